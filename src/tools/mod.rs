//! MCP tool implementations.
//!
//! - `execute`: the `execute_sql` tool handler
//! - `sql_validator`: statement segmentation and read-only enforcement

pub mod execute;
pub mod sql_validator;

pub use execute::{ExecuteSqlInput, ExecuteSqlOutput, ExecuteToolHandler};
