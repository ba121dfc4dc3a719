//! Data models for the DB gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{DatabaseType, SslMode};
pub use query::{SqlResult, SqlRow};
pub use schema::{
    IndexColumnRow, ProcedureKind, StoredProcedure, TableColumn, TableIndex, parse_nullable,
};
