//! Schema-related data models.
//!
//! These are the engine-neutral shapes every connector produces from its own
//! catalog views.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A table column, in catalog ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub column_name: String,
    /// Engine-reported type name, e.g. "character varying" or "int"
    pub data_type: String,
    pub is_nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_default: Option<String>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            column_name: name.into(),
            data_type: data_type.into(),
            is_nullable: nullable,
            column_default: None,
        }
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.column_default = default.filter(|d| !d.is_empty());
        self
    }
}

/// Interpret the many spellings catalogs use for a nullability flag.
pub fn parse_nullable(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "YES" | "Y" | "TRUE" | "1"
    )
}

/// One catalog row describing a single column of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumnRow {
    pub index_name: String,
    pub column_name: String,
    pub is_unique: bool,
    pub is_primary: bool,
    /// 1-based key position of the column inside the index
    pub seq_in_index: i64,
}

impl IndexColumnRow {
    pub fn new(
        index_name: impl Into<String>,
        column_name: impl Into<String>,
        seq_in_index: i64,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            column_name: column_name.into(),
            is_unique: false,
            is_primary: false,
            seq_in_index,
        }
    }

    pub fn with_flags(mut self, is_unique: bool, is_primary: bool) -> Self {
        self.is_unique = is_unique || is_primary;
        self.is_primary = is_primary;
        self
    }
}

/// An index with its key columns in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIndex {
    pub index_name: String,
    pub column_names: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

impl TableIndex {
    /// Merge per-column catalog rows into one entry per index.
    ///
    /// Flags are taken from the first row seen for an index and never
    /// recomputed. Columns are ordered by key sequence regardless of the
    /// order the catalog returned them in. Indexes keep first-seen order.
    pub fn group_rows(rows: impl IntoIterator<Item = IndexColumnRow>) -> Vec<TableIndex> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, (TableIndex, Vec<(i64, String)>)> = HashMap::new();

        for row in rows {
            let entry = grouped.entry(row.index_name.clone()).or_insert_with(|| {
                order.push(row.index_name.clone());
                (
                    TableIndex {
                        index_name: row.index_name.clone(),
                        column_names: Vec::new(),
                        is_unique: row.is_unique,
                        is_primary: row.is_primary,
                    },
                    Vec::new(),
                )
            });
            entry.1.push((row.seq_in_index, row.column_name));
        }

        order
            .into_iter()
            .filter_map(|name| grouped.remove(&name))
            .map(|(mut index, mut columns)| {
                columns.sort_by_key(|(seq, _)| *seq);
                index.column_names = columns.into_iter().map(|(_, c)| c).collect();
                index
            })
            .collect()
    }
}

/// Routine kind as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    Procedure,
    Function,
}

impl ProcedureKind {
    /// Parse a catalog routine type ("PROCEDURE", "FUNCTION", SQL Server "P"/"FN").
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROCEDURE" | "P" | "PC" => Self::Procedure,
            _ => Self::Function,
        }
    }

    pub fn as_sql_keyword(&self) -> &'static str {
        match self {
            Self::Procedure => "PROCEDURE",
            Self::Function => "FUNCTION",
        }
    }
}

/// A stored procedure or function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProcedure {
    pub procedure_name: String,
    pub procedure_type: ProcedureKind,
    pub language: String,
    /// Flattened "name mode type" list, comma separated
    pub parameter_list: String,
    /// Functions only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl StoredProcedure {
    pub fn new(name: impl Into<String>, kind: ProcedureKind, language: impl Into<String>) -> Self {
        Self {
            procedure_name: name.into(),
            procedure_type: kind,
            language: language.into(),
            parameter_list: String::new(),
            return_type: None,
            definition: None,
        }
    }

    pub fn with_parameters(mut self, parameter_list: Option<String>) -> Self {
        self.parameter_list = parameter_list.unwrap_or_default();
        self
    }

    /// Only kept for functions; procedures never report a return type.
    pub fn with_return_type(mut self, return_type: Option<String>) -> Self {
        self.return_type = match self.procedure_type {
            ProcedureKind::Function => return_type.filter(|t| !t.is_empty()),
            ProcedureKind::Procedure => None,
        };
        self
    }

    pub fn with_definition(mut self, definition: Option<String>) -> Self {
        self.definition = definition.filter(|d| !d.trim().is_empty());
        self
    }
}
