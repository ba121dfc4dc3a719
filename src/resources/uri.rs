//! Resource addresses.
//!
//! Every resource lives under `db://schemas`:
//!
//! - `db://schemas`
//! - `db://schemas/{schema}/tables`
//! - `db://schemas/{schema}/tables/{table}`
//! - `db://schemas/{schema}/tables/{table}/indexes`
//! - `db://schemas/{schema}/procedures`
//! - `db://schemas/{schema}/procedures/{procedure}`
//!
//! Path segments are percent-decoded on parse and encoded on render, so names
//! containing `/` or spaces survive a round trip.

use crate::db::dsn::percent_decode;
use crate::error::{DbError, DbResult};
use std::fmt;

pub const URI_PREFIX: &str = "db://";

/// A parsed resource address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceUri {
    Schemas,
    Tables { schema: String },
    Table { schema: String, table: String },
    TableIndexes { schema: String, table: String },
    Procedures { schema: String },
    Procedure { schema: String, procedure: String },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> DbResult<Self> {
        let invalid = |reason: &str| DbError::invalid_input(format!("Invalid resource URI '{uri}': {reason}"));

        let path = uri
            .strip_prefix(URI_PREFIX)
            .ok_or_else(|| invalid("URI must start with 'db://'"))?;
        let segments: Vec<String> = path
            .trim_end_matches('/')
            .split('/')
            .map(percent_decode)
            .collect::<Result<_, _>>()
            .map_err(|_| invalid("path segment is not valid UTF-8"))?;
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let parsed = match segments.as_slice() {
            ["schemas"] => Self::Schemas,
            ["schemas", schema, "tables"] => Self::Tables {
                schema: schema.to_string(),
            },
            ["schemas", schema, "tables", table] => Self::Table {
                schema: schema.to_string(),
                table: table.to_string(),
            },
            ["schemas", schema, "tables", table, "indexes"] => Self::TableIndexes {
                schema: schema.to_string(),
                table: table.to_string(),
            },
            ["schemas", schema, "procedures"] => Self::Procedures {
                schema: schema.to_string(),
            },
            ["schemas", schema, "procedures", procedure] => Self::Procedure {
                schema: schema.to_string(),
                procedure: procedure.to_string(),
            },
            ["schemas", _] => return Err(invalid("expected 'tables' or 'procedures' after the schema")),
            ["schemas", ..] => return Err(invalid("unknown resource path")),
            [other, ..] => {
                return Err(invalid(&format!(
                    "unknown resource type '{other}', addresses start with db://schemas"
                )));
            }
            [] => return Err(invalid("empty path")),
        };
        Ok(parsed)
    }

    /// Code placed in the envelope when this resource's handler fails.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Schemas => "SCHEMAS_RETRIEVAL_ERROR",
            Self::Tables { .. } => "TABLES_RETRIEVAL_ERROR",
            Self::Table { .. } => "TABLE_STRUCTURE_ERROR",
            Self::TableIndexes { .. } => "TABLE_INDEXES_ERROR",
            Self::Procedures { .. } => "PROCEDURES_RETRIEVAL_ERROR",
            Self::Procedure { .. } => "PROCEDURE_DETAIL_ERROR",
        }
    }

    /// Human-readable resource name for listings.
    pub fn display_name(&self) -> String {
        match self {
            Self::Schemas => "All schemas".to_string(),
            Self::Tables { schema } => format!("Tables in {schema}"),
            Self::Table { schema, table } => format!("{schema}.{table} structure"),
            Self::TableIndexes { schema, table } => format!("{schema}.{table} indexes"),
            Self::Procedures { schema } => format!("Procedures in {schema}"),
            Self::Procedure { schema, procedure } => format!("{schema}.{procedure} procedure"),
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{URI_PREFIX}schemas")?;
        match self {
            Self::Schemas => Ok(()),
            Self::Tables { schema } => write!(f, "/{}/tables", encode_segment(schema)),
            Self::Table { schema, table } => write!(
                f,
                "/{}/tables/{}",
                encode_segment(schema),
                encode_segment(table)
            ),
            Self::TableIndexes { schema, table } => write!(
                f,
                "/{}/tables/{}/indexes",
                encode_segment(schema),
                encode_segment(table)
            ),
            Self::Procedures { schema } => write!(f, "/{}/procedures", encode_segment(schema)),
            Self::Procedure { schema, procedure } => write!(
                f,
                "/{}/procedures/{}",
                encode_segment(schema),
                encode_segment(procedure)
            ),
        }
    }
}

/// Escape characters that would break segment splitting.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ' ' => out.push_str("%20"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            c => out.push(c),
        }
    }
    out
}

/// A parameterized address pattern answered on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTemplateDef {
    pub uri_template: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const TEMPLATES: &[ResourceTemplateDef] = &[
    ResourceTemplateDef {
        uri_template: "db://schemas/{schema}/tables",
        name: "Tables in schema",
        description: "Names of all tables in a schema",
    },
    ResourceTemplateDef {
        uri_template: "db://schemas/{schema}/tables/{table}",
        name: "Table structure",
        description: "Columns of a table in ordinal order: name, type, nullability and default",
    },
    ResourceTemplateDef {
        uri_template: "db://schemas/{schema}/tables/{table}/indexes",
        name: "Table indexes",
        description: "Indexes of a table with their key columns, uniqueness and primary-key flags",
    },
    ResourceTemplateDef {
        uri_template: "db://schemas/{schema}/procedures",
        name: "Procedures in schema",
        description: "Names of all stored procedures and functions in a schema",
    },
    ResourceTemplateDef {
        uri_template: "db://schemas/{schema}/procedures/{procedure}",
        name: "Procedure detail",
        description: "Kind, language, parameters, return type and definition of a routine",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_shapes() {
        assert_eq!(ResourceUri::parse("db://schemas").unwrap(), ResourceUri::Schemas);
        assert_eq!(
            ResourceUri::parse("db://schemas/public/tables").unwrap(),
            ResourceUri::Tables {
                schema: "public".into()
            }
        );
        assert_eq!(
            ResourceUri::parse("db://schemas/public/tables/orders").unwrap(),
            ResourceUri::Table {
                schema: "public".into(),
                table: "orders".into()
            }
        );
        assert_eq!(
            ResourceUri::parse("db://schemas/public/tables/orders/indexes").unwrap(),
            ResourceUri::TableIndexes {
                schema: "public".into(),
                table: "orders".into()
            }
        );
        assert_eq!(
            ResourceUri::parse("db://schemas/dbo/procedures").unwrap(),
            ResourceUri::Procedures {
                schema: "dbo".into()
            }
        );
        assert_eq!(
            ResourceUri::parse("db://schemas/dbo/procedures/usp_x").unwrap(),
            ResourceUri::Procedure {
                schema: "dbo".into(),
                procedure: "usp_x".into()
            }
        );
    }

    #[test]
    fn test_trailing_slash_accepted() {
        assert_eq!(ResourceUri::parse("db://schemas/").unwrap(), ResourceUri::Schemas);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for uri in [
            "mysql://schemas",
            "db://",
            "db://tables",
            "db://schemas/public",
            "db://schemas/public/views",
            "db://schemas//tables",
            "db://schemas/public/tables/t/columns",
            "db://schemas/%FF/tables",
        ] {
            let err = ResourceUri::parse(uri).unwrap_err();
            assert!(matches!(err, DbError::InvalidInput { .. }), "{uri}");
        }
    }

    #[test]
    fn test_display_round_trip_with_escapes() {
        let uri = ResourceUri::Table {
            schema: "my schema".into(),
            table: "a/b".into(),
        };
        let rendered = uri.to_string();
        assert_eq!(rendered, "db://schemas/my%20schema/tables/a%2Fb");
        assert_eq!(ResourceUri::parse(&rendered).unwrap(), uri);
    }

    #[test]
    fn test_error_codes() {
        let uri = ResourceUri::parse("db://schemas/s/tables/t/indexes").unwrap();
        assert_eq!(uri.error_code(), "TABLE_INDEXES_ERROR");
        assert_eq!(ResourceUri::Schemas.error_code(), "SCHEMAS_RETRIEVAL_ERROR");
    }

    #[test]
    fn test_templates_cover_every_parameterized_shape() {
        assert_eq!(TEMPLATES.len(), 5);
        assert!(TEMPLATES.iter().all(|t| t.uri_template.starts_with("db://schemas/{schema}/")));
    }
}
