//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - DSN parsing and redaction
//! - The connector trait and one connector per backend family
//! - A scheme-keyed registry of connector descriptors
//! - The manager owning the single active connector
//! - Statement execution and row-to-JSON mappings

pub mod connector;
pub mod dsn;
pub mod executor;
pub mod manager;
pub mod mariadb;
pub mod mysql;
pub mod postgres;
pub mod registry;
pub mod sqlserver;
pub mod types;

pub use connector::{Connector, ConnectorDescriptor, PoolSettings};
pub use dsn::{Dsn, redact_dsn};
pub use executor::{ExecuteOptions, ExecutionPlan};
pub use manager::{ConnectorManager, ManagerOptions};
pub use registry::ConnectorRegistry;
