//! DB Gateway MCP Library
//!
//! Exposes the metadata of a PostgreSQL, MySQL, MariaDB or SQL Server database
//! as MCP resources, plus an `execute_sql` tool, through one pluggable
//! connector per backend family.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod resources;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::GatewayService;
