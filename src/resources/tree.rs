//! Resource tree over the active connector.
//!
//! Two kinds of resources are exposed:
//!
//! - Templates (`db://schemas/{schema}/...`) are answered on demand for any
//!   schema, so they always reflect live metadata.
//! - The default-schema snapshot is taken once at startup. Every table and
//!   routine of the connection's current schema is listed as a concrete
//!   resource. The snapshot is never refreshed; objects created later are
//!   reachable through the templates only.
//!
//! Both kinds are read through the same handler, which wraps every outcome in
//! a [`ResponseEnvelope`] so no connector error crosses the handler boundary.

use crate::db::{Connector, ConnectorManager};
use crate::error::{DbError, DbResult};
use crate::mcp::response::ResponseEnvelope;
use crate::models::{StoredProcedure, TableColumn, TableIndex};
use crate::resources::uri::{ResourceTemplateDef, ResourceUri, TEMPLATES};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const SCHEMA_NOT_FOUND: &str = "SCHEMA_NOT_FOUND";
pub const TABLE_NOT_FOUND: &str = "TABLE_NOT_FOUND";

/// Tables and routines of the default schema, captured at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub schema: String,
    pub tables: Vec<String>,
    pub procedures: Vec<String>,
}

impl SchemaSnapshot {
    /// Concrete addresses this snapshot registers.
    pub fn resources(&self) -> Vec<ResourceUri> {
        let schema = &self.schema;
        let mut resources = vec![
            ResourceUri::Tables {
                schema: schema.clone(),
            },
            ResourceUri::Procedures {
                schema: schema.clone(),
            },
        ];
        for table in &self.tables {
            resources.push(ResourceUri::Table {
                schema: schema.clone(),
                table: table.clone(),
            });
            resources.push(ResourceUri::TableIndexes {
                schema: schema.clone(),
                table: table.clone(),
            });
        }
        resources.extend(self.procedures.iter().map(|procedure| ResourceUri::Procedure {
            schema: schema.clone(),
            procedure: procedure.clone(),
        }));
        resources
    }
}

// Resource payloads

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaList {
    pub schemas: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableList {
    pub schema: String,
    pub tables: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    pub schema: String,
    pub table: String,
    pub columns: Vec<TableColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableIndexList {
    pub schema: String,
    pub table: String,
    pub indexes: Vec<TableIndex>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureList {
    pub schema: String,
    pub procedures: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDetail {
    pub schema: String,
    #[serde(flatten)]
    pub procedure: StoredProcedure,
}

/// Why a resource could not be produced.
enum ResourceFailure {
    /// An existence check failed before introspection ran.
    Missing { code: &'static str, error: DbError },
    Failed(DbError),
}

impl From<DbError> for ResourceFailure {
    fn from(error: DbError) -> Self {
        Self::Failed(error)
    }
}

type ResourceResult = Result<JsonValue, ResourceFailure>;

fn payload(data: impl Serialize) -> ResourceResult {
    serde_json::to_value(data).map_err(|e| DbError::internal(e.to_string()).into())
}

pub struct ResourceTree {
    manager: Arc<ConnectorManager>,
    snapshot: OnceCell<Option<SchemaSnapshot>>,
}

impl ResourceTree {
    pub fn new(manager: Arc<ConnectorManager>) -> Self {
        Self {
            manager,
            snapshot: OnceCell::new(),
        }
    }

    /// Capture the default-schema snapshot. Only the first call queries the
    /// database; later calls return the same snapshot.
    ///
    /// Yields `None` when the connection has no current schema or the capture failed.
    pub async fn capture_snapshot(&self) -> Option<&SchemaSnapshot> {
        self.snapshot
            .get_or_init(|| async {
                match capture(&self.manager).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "Default schema snapshot failed; only templates are available");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub fn snapshot(&self) -> Option<&SchemaSnapshot> {
        self.snapshot.get().and_then(Option::as_ref)
    }

    /// Every concrete resource: the schema list plus the snapshot entries.
    pub fn list_resources(&self) -> Vec<ResourceUri> {
        let mut resources = vec![ResourceUri::Schemas];
        if let Some(snapshot) = self.snapshot() {
            resources.extend(snapshot.resources());
        }
        resources
    }

    pub fn templates(&self) -> &'static [ResourceTemplateDef] {
        TEMPLATES
    }

    /// Parse and read a resource address.
    ///
    /// Fails only for an unknown address or a missing connector. Every
    /// handler failure comes back as an error envelope.
    pub async fn read_uri(&self, uri: &str) -> DbResult<ResponseEnvelope> {
        let parsed = ResourceUri::parse(uri)?;
        self.read(&parsed).await
    }

    pub async fn read(&self, uri: &ResourceUri) -> DbResult<ResponseEnvelope> {
        let connector = self.manager.connector().await?;
        let address = uri.to_string();

        let envelope = match resolve(connector.as_ref(), uri).await {
            Ok(data) => ResponseEnvelope::success(address, data),
            Err(ResourceFailure::Missing { code, error }) => {
                debug!(uri = %address, code, "Resource target does not exist");
                ResponseEnvelope::error(address, error.to_string(), code)
            }
            Err(ResourceFailure::Failed(error)) => {
                warn!(uri = %address, error = %error, "Resource handler failed");
                ResponseEnvelope::error(address, error.to_string(), uri.error_code())
            }
        };
        Ok(envelope)
    }
}

impl std::fmt::Debug for ResourceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTree")
            .field("snapshot", &self.snapshot.get())
            .finish_non_exhaustive()
    }
}

async fn capture(manager: &ConnectorManager) -> DbResult<Option<SchemaSnapshot>> {
    let connector = manager.connector().await?;
    let Some(schema) = connector.current_schema().await? else {
        info!("Connection has no current schema; skipping default schema resources");
        return Ok(None);
    };

    let tables = connector.get_tables(Some(&schema)).await?;
    let procedures = connector.get_stored_procedures(Some(&schema)).await?;
    info!(
        schema = %schema,
        tables = tables.len(),
        procedures = procedures.len(),
        "Captured default schema resources"
    );

    Ok(Some(SchemaSnapshot {
        schema,
        tables,
        procedures,
    }))
}

async fn require_schema(connector: &dyn Connector, schema: &str) -> Result<(), ResourceFailure> {
    let schemas = connector.get_schemas().await?;
    if schemas.iter().any(|s| s == schema) {
        Ok(())
    } else {
        Err(ResourceFailure::Missing {
            code: SCHEMA_NOT_FOUND,
            error: DbError::not_found("Schema", schema),
        })
    }
}

async fn require_table(
    connector: &dyn Connector,
    schema: &str,
    table: &str,
) -> Result<(), ResourceFailure> {
    require_schema(connector, schema).await?;
    if connector.table_exists(table, Some(schema)).await? {
        Ok(())
    } else {
        Err(ResourceFailure::Missing {
            code: TABLE_NOT_FOUND,
            error: DbError::not_found("Table", format!("{schema}.{table}")),
        })
    }
}

async fn resolve(connector: &dyn Connector, uri: &ResourceUri) -> ResourceResult {
    match uri {
        ResourceUri::Schemas => {
            let schemas = connector.get_schemas().await?;
            payload(SchemaList {
                count: schemas.len(),
                schemas,
            })
        }
        ResourceUri::Tables { schema } => {
            require_schema(connector, schema).await?;
            let tables = connector.get_tables(Some(schema)).await?;
            payload(TableList {
                schema: schema.clone(),
                count: tables.len(),
                tables,
            })
        }
        ResourceUri::Table { schema, table } => {
            require_table(connector, schema, table).await?;
            let columns = connector.get_table_schema(table, Some(schema)).await?;
            payload(TableStructure {
                schema: schema.clone(),
                table: table.clone(),
                columns,
            })
        }
        ResourceUri::TableIndexes { schema, table } => {
            require_table(connector, schema, table).await?;
            let indexes = connector.get_table_indexes(table, Some(schema)).await?;
            payload(TableIndexList {
                schema: schema.clone(),
                table: table.clone(),
                indexes,
            })
        }
        ResourceUri::Procedures { schema } => {
            require_schema(connector, schema).await?;
            let procedures = connector.get_stored_procedures(Some(schema)).await?;
            payload(ProcedureList {
                schema: schema.clone(),
                count: procedures.len(),
                procedures,
            })
        }
        ResourceUri::Procedure { schema, procedure } => {
            require_schema(connector, schema).await?;
            let detail = connector
                .get_stored_procedure_detail(procedure, Some(schema))
                .await?;
            payload(ProcedureDetail {
                schema: schema.clone(),
                procedure: detail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_resources() {
        let snapshot = SchemaSnapshot {
            schema: "public".into(),
            tables: vec!["orders".into(), "users".into()],
            procedures: vec!["refresh".into()],
        };
        let uris: Vec<String> = snapshot.resources().iter().map(ToString::to_string).collect();
        assert_eq!(
            uris,
            vec![
                "db://schemas/public/tables",
                "db://schemas/public/procedures",
                "db://schemas/public/tables/orders",
                "db://schemas/public/tables/orders/indexes",
                "db://schemas/public/tables/users",
                "db://schemas/public/tables/users/indexes",
                "db://schemas/public/procedures/refresh",
            ]
        );
    }

    #[test]
    fn test_empty_snapshot_still_lists_schema_lists() {
        let snapshot = SchemaSnapshot {
            schema: "app".into(),
            tables: vec![],
            procedures: vec![],
        };
        assert_eq!(snapshot.resources().len(), 2);
    }

    #[test]
    fn test_procedure_detail_payload_is_flat() {
        use crate::models::ProcedureKind;
        let detail = ProcedureDetail {
            schema: "public".into(),
            procedure: StoredProcedure::new("f", ProcedureKind::Function, "sql"),
        };
        let value = serde_json::to_value(detail).unwrap();
        assert_eq!(value["schema"], "public");
        assert_eq!(value["procedure_name"], "f");
        assert_eq!(value["procedure_type"], "function");
    }
}
