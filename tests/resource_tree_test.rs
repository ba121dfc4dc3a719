//! Integration tests for the resource tree, backed by an in-memory connector.

use async_trait::async_trait;
use db_gateway_mcp::db::{Connector, ConnectorManager, Dsn, ExecuteOptions, ManagerOptions};
use db_gateway_mcp::error::{DbError, DbResult};
use db_gateway_mcp::models::{
    DatabaseType, ProcedureKind, SqlResult, StoredProcedure, TableColumn, TableIndex,
};
use db_gateway_mcp::resources::ResourceTree;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A catalog with one `public` schema and an empty `audit` schema.
#[derive(Default)]
struct CatalogConnector {
    current_schema: Option<String>,
    fail_tables: bool,
    catalog_calls: AtomicUsize,
}

impl CatalogConnector {
    fn with_schema(schema: &str) -> Self {
        Self {
            current_schema: Some(schema.to_string()),
            ..Default::default()
        }
    }

    fn tables_in(schema: &str) -> Vec<String> {
        match schema {
            "public" => vec!["orders".into(), "users".into()],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Connector for CatalogConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, _dsn: &Dsn) -> DbResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        Ok(())
    }

    async fn server_version(&self) -> DbResult<String> {
        Ok("16.2".into())
    }

    async fn current_schema(&self) -> DbResult<Option<String>> {
        Ok(self.current_schema.clone())
    }

    async fn get_schemas(&self) -> DbResult<Vec<String>> {
        Ok(vec!["audit".into(), "public".into()])
    }

    async fn get_tables(&self, schema: Option<&str>) -> DbResult<Vec<String>> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tables {
            return Err(DbError::introspection("list tables", "permission denied"));
        }
        Ok(Self::tables_in(schema.unwrap_or("public")))
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> DbResult<bool> {
        Ok(Self::tables_in(schema.unwrap_or("public")).iter().any(|t| t == table))
    }

    async fn get_table_schema(
        &self,
        _table: &str,
        _schema: Option<&str>,
    ) -> DbResult<Vec<TableColumn>> {
        Ok(vec![
            TableColumn {
                column_name: "id".into(),
                data_type: "integer".into(),
                is_nullable: false,
                column_default: Some("nextval('orders_id_seq'::regclass)".into()),
            },
            TableColumn {
                column_name: "note".into(),
                data_type: "text".into(),
                is_nullable: true,
                column_default: None,
            },
        ])
    }

    async fn get_table_indexes(
        &self,
        _table: &str,
        _schema: Option<&str>,
    ) -> DbResult<Vec<TableIndex>> {
        Ok(vec![TableIndex {
            index_name: "orders_pkey".into(),
            column_names: vec!["id".into()],
            is_unique: true,
            is_primary: true,
        }])
    }

    async fn get_stored_procedures(&self, schema: Option<&str>) -> DbResult<Vec<String>> {
        match schema.unwrap_or("public") {
            "public" => Ok(vec!["refresh_totals".into()]),
            _ => Ok(Vec::new()),
        }
    }

    async fn get_stored_procedure_detail(
        &self,
        name: &str,
        _schema: Option<&str>,
    ) -> DbResult<StoredProcedure> {
        if name != "refresh_totals" {
            return Err(DbError::not_found("Procedure", name));
        }
        let mut procedure = StoredProcedure::new(name, ProcedureKind::Procedure, "plpgsql");
        procedure.parameter_list = "since IN date".into();
        procedure.definition = Some("BEGIN END".into());
        Ok(procedure)
    }

    async fn execute_sql(&self, _sql: &str, _options: ExecuteOptions) -> DbResult<SqlResult> {
        Ok(SqlResult::empty())
    }
}

fn tree_with(connector: CatalogConnector) -> (Arc<CatalogConnector>, ResourceTree) {
    let connector = Arc::new(connector);
    let manager = Arc::new(ConnectorManager::with_connector(
        connector.clone(),
        ManagerOptions::default(),
    ));
    (connector, ResourceTree::new(manager))
}

/// The snapshot lists the default schema's tables, indexes and procedures.
#[tokio::test]
async fn test_snapshot_lists_default_schema_resources() {
    let (_, tree) = tree_with(CatalogConnector::with_schema("public"));
    let snapshot = tree.capture_snapshot().await.unwrap();
    assert_eq!(snapshot.schema, "public");

    let uris: Vec<String> = tree.list_resources().iter().map(|u| u.to_string()).collect();
    assert_eq!(uris[0], "db://schemas");
    assert!(uris.contains(&"db://schemas/public/tables/orders".to_string()));
    assert!(uris.contains(&"db://schemas/public/tables/users/indexes".to_string()));
    assert!(uris.contains(&"db://schemas/public/procedures/refresh_totals".to_string()));
}

/// Only the first capture queries the catalog.
#[tokio::test]
async fn test_snapshot_is_captured_once() {
    let (connector, tree) = tree_with(CatalogConnector::with_schema("public"));
    tree.capture_snapshot().await;
    tree.capture_snapshot().await;
    assert_eq!(connector.catalog_calls.load(Ordering::SeqCst), 1);
}

/// A connection without a current schema exposes only the schema list.
#[tokio::test]
async fn test_no_current_schema_skips_snapshot() {
    let (_, tree) = tree_with(CatalogConnector::default());
    assert!(tree.capture_snapshot().await.is_none());
    assert_eq!(tree.list_resources().len(), 1);
    assert_eq!(tree.templates().len(), 5);
}

/// A failing snapshot is not fatal.
#[tokio::test]
async fn test_failed_snapshot_is_not_fatal() {
    let (_, tree) = tree_with(CatalogConnector {
        current_schema: Some("public".into()),
        fail_tables: true,
        ..Default::default()
    });
    assert!(tree.capture_snapshot().await.is_none());
    assert_eq!(tree.list_resources().len(), 1);
}

/// Reading the schema list.
#[tokio::test]
async fn test_read_schema_list() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree.read_uri("db://schemas").await.unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.address, "db://schemas");
    let data = envelope.data.unwrap();
    assert_eq!(data["count"], 2);
    assert_eq!(data["schemas"][1], "public");
}

/// Reading a table structure returns columns in order.
#[tokio::test]
async fn test_read_table_structure() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree
        .read_uri("db://schemas/public/tables/orders")
        .await
        .unwrap();
    assert!(envelope.success);
    let data = envelope.data.unwrap();
    assert_eq!(data["table"], "orders");
    assert_eq!(data["columns"][0]["column_name"], "id");
    assert_eq!(data["columns"][1]["is_nullable"], true);
}

/// Reading indexes.
#[tokio::test]
async fn test_read_table_indexes() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree
        .read_uri("db://schemas/public/tables/orders/indexes")
        .await
        .unwrap();
    let data = envelope.data.unwrap();
    assert_eq!(data["indexes"][0]["index_name"], "orders_pkey");
    assert_eq!(data["indexes"][0]["is_primary"], true);
}

/// An unknown schema is reported in the envelope, not as a protocol error.
#[tokio::test]
async fn test_unknown_schema_envelope() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree.read_uri("db://schemas/sales/tables").await.unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.code.as_deref(), Some("SCHEMA_NOT_FOUND"));
    assert!(envelope.error.unwrap().contains("sales"));
}

/// An unknown table is reported in the envelope.
#[tokio::test]
async fn test_unknown_table_envelope() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree
        .read_uri("db://schemas/public/tables/invoices")
        .await
        .unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.code.as_deref(), Some("TABLE_NOT_FOUND"));
}

/// An empty schema lists no tables but still succeeds.
#[tokio::test]
async fn test_empty_schema_lists_no_tables() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree.read_uri("db://schemas/audit/tables").await.unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.data.unwrap()["count"], 0);
}

/// Procedure detail is flattened next to the schema name.
#[tokio::test]
async fn test_read_procedure_detail() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree
        .read_uri("db://schemas/public/procedures/refresh_totals")
        .await
        .unwrap();
    let data = envelope.data.unwrap();
    assert_eq!(data["schema"], "public");
    assert_eq!(data["procedure_name"], "refresh_totals");
    assert_eq!(data["procedure_type"], "procedure");
    assert_eq!(data["definition"], "BEGIN END");
}

/// A missing procedure carries the procedure detail error code.
#[tokio::test]
async fn test_missing_procedure_envelope() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree
        .read_uri("db://schemas/public/procedures/nope")
        .await
        .unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.code.as_deref(), Some("PROCEDURE_DETAIL_ERROR"));
}

/// Percent-encoded segments are decoded before lookup.
#[tokio::test]
async fn test_encoded_segments_are_decoded() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let envelope = tree
        .read_uri("db://schemas/public/tables/%6Frders")
        .await
        .unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.address, "db://schemas/public/tables/orders");
}

/// Malformed addresses are rejected before reaching the database.
#[tokio::test]
async fn test_malformed_uri_is_an_error() {
    let (_, tree) = tree_with(CatalogConnector::default());
    let err = tree.read_uri("db://catalogs/public").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert!(tree.read_uri("file:///etc/passwd").await.is_err());
}

/// A resource read carries exactly what the connector call returns.
#[tokio::test]
async fn test_read_matches_direct_connector_call() {
    let (connector, tree) = tree_with(CatalogConnector::default());

    let direct = connector.get_table_schema("orders", Some("public")).await.unwrap();
    let envelope = tree
        .read_uri("db://schemas/public/tables/orders")
        .await
        .unwrap();
    assert_eq!(
        envelope.data.unwrap()["columns"],
        serde_json::to_value(direct).unwrap()
    );

    let direct = connector.get_stored_procedures(Some("public")).await.unwrap();
    let envelope = tree.read_uri("db://schemas/public/procedures").await.unwrap();
    assert_eq!(
        envelope.data.unwrap()["procedures"],
        serde_json::to_value(direct).unwrap()
    );
}
