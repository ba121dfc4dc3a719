//! SQL execution tool.
//!
//! Implements the `execute_sql` MCP tool. The SQL text may hold several
//! statements; they run in order on one connection and their rows are
//! concatenated. In read-only mode the whole batch is checked before anything runs.

use crate::db::ConnectorManager;
use crate::error::{DbError, DbResult};
use crate::models::SqlRow;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Input for the execute_sql tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteSqlInput {
    /// SQL to run. Separate multiple statements with semicolons; they share one session.
    pub sql: String,
}

/// Output from the execute_sql tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteSqlOutput {
    /// Rows from every statement that returned rows, in statement order
    pub rows: Vec<SqlRow>,
    /// Number of rows returned
    pub count: usize,
}

/// Handler for SQL execution.
pub struct ExecuteToolHandler {
    manager: Arc<ConnectorManager>,
}

impl ExecuteToolHandler {
    pub fn new(manager: Arc<ConnectorManager>) -> Self {
        Self { manager }
    }

    /// Handle the execute_sql tool call.
    pub async fn execute(&self, input: ExecuteSqlInput) -> DbResult<ExecuteSqlOutput> {
        if input.sql.trim().is_empty() {
            return Err(DbError::invalid_input("sql must not be empty"));
        }

        let result = self.manager.execute_sql(&input.sql).await?;
        let count = result.len();

        info!(
            rows = count,
            readonly = self.manager.is_read_only(),
            "execute_sql completed"
        );

        Ok(ExecuteSqlOutput {
            rows: result.rows,
            count,
        })
    }
}

/// Tool description shown to clients, naming the active execution policy.
pub fn tool_description(readonly: bool) -> String {
    let mode = if readonly {
        "Read-only mode is ON: only read statements (SELECT, WITH, EXPLAIN, SHOW and similar) are accepted, and a batch containing any other statement is rejected before it runs."
    } else {
        "Read-only mode is OFF: any statement is accepted."
    };
    format!(
        "Execute SQL against the connected database.\n\
         Multiple statements separated by semicolons run in order on the same connection, so temporary tables and session variables carry across them.\n\
         Returns the rows of every statement that produced rows.\n{}",
        mode
    )
}
