//! Query-related data models.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row, column name to value.
pub type SqlRow = serde_json::Map<String, JsonValue>;

/// Rows produced by executing a SQL text.
///
/// Empty for statements that return no rows. For a batch, rows of every
/// row-returning statement are concatenated in statement order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlResult {
    pub rows: Vec<SqlRow>,
}

impl SqlResult {
    pub fn new(rows: Vec<SqlRow>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, rows: Vec<SqlRow>) {
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
