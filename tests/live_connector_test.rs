//! Tests against real database servers.
//!
//! Each test reads its DSN from the environment and is ignored by default:
//!
//! ```text
//! TEST_POSTGRES_DSN=postgres://... cargo test --test live_connector_test -- --ignored
//! ```

use db_gateway_mcp::db::{ConnectorManager, ConnectorRegistry, ManagerOptions};
use db_gateway_mcp::models::DatabaseType;
use db_gateway_mcp::resources::ResourceTree;
use std::sync::Arc;

async fn connect(var: &str, readonly: bool) -> Option<Arc<ConnectorManager>> {
    let dsn = match std::env::var(var) {
        Ok(dsn) => dsn,
        Err(_) => {
            eprintln!("Skipping test: {var} not set");
            return None;
        }
    };
    let manager = Arc::new(ConnectorManager::new(
        ConnectorRegistry::with_defaults(),
        ManagerOptions {
            readonly,
            ..Default::default()
        },
    ));
    manager.connect(&dsn).await.unwrap();
    Some(manager)
}

/// Temp-table batch for each family; only works if every statement shares one session.
fn temp_table_batch(db: DatabaseType) -> &'static str {
    match db {
        DatabaseType::Postgres => {
            "CREATE TEMP TABLE gw_batch (id int); INSERT INTO gw_batch VALUES (1), (2); SELECT COUNT(*) AS n FROM gw_batch"
        }
        DatabaseType::MySql | DatabaseType::MariaDb => {
            "CREATE TEMPORARY TABLE gw_batch (id int); INSERT INTO gw_batch VALUES (1), (2); SELECT COUNT(*) AS n FROM gw_batch"
        }
        DatabaseType::SqlServer => {
            "CREATE TABLE #gw_batch (id int); INSERT INTO #gw_batch VALUES (1), (2); SELECT COUNT(*) AS n FROM #gw_batch"
        }
    }
}

async fn check_batch_session_affinity(var: &str) {
    let Some(manager) = connect(var, false).await else {
        return;
    };
    let db = manager.database_type().await.unwrap();
    let result = manager.execute_sql(temp_table_batch(db)).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0]["n"], 2);
    manager.disconnect().await.unwrap();
}

async fn check_readonly_rejects_writes(var: &str) {
    let Some(manager) = connect(var, true).await else {
        return;
    };
    let err = manager
        .execute_sql("SELECT 1; DROP TABLE gw_never_created")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "READONLY_VIOLATION");
    assert!(manager.execute_sql("SELECT 1 AS one").await.is_ok());
    manager.disconnect().await.unwrap();
}

async fn check_schema_resources(var: &str) {
    let Some(manager) = connect(var, true).await else {
        return;
    };
    let tree = ResourceTree::new(manager.clone());
    let envelope = tree.read_uri("db://schemas").await.unwrap();
    assert!(envelope.success, "{:?}", envelope.error);

    if let Some(snapshot) = tree.capture_snapshot().await {
        let uri = format!("db://schemas/{}/tables", snapshot.schema);
        let envelope = tree.read_uri(&uri).await.unwrap();
        assert!(envelope.success, "{:?}", envelope.error);
    }
    manager.disconnect().await.unwrap();
}

/// Postgres batch shares one session.
#[tokio::test]
#[ignore]
async fn test_postgres_batch_session_affinity() {
    check_batch_session_affinity("TEST_POSTGRES_DSN").await;
}

/// MySQL batch shares one session.
#[tokio::test]
#[ignore]
async fn test_mysql_batch_session_affinity() {
    check_batch_session_affinity("TEST_MYSQL_DSN").await;
}

/// MariaDB batch shares one session.
#[tokio::test]
#[ignore]
async fn test_mariadb_batch_session_affinity() {
    check_batch_session_affinity("TEST_MARIADB_DSN").await;
}

/// SQL Server batch shares one session, so `#temp` tables survive.
#[tokio::test]
#[ignore]
async fn test_sqlserver_batch_session_affinity() {
    check_batch_session_affinity("TEST_SQLSERVER_DSN").await;
}

/// Read-only mode on a real Postgres server.
#[tokio::test]
#[ignore]
async fn test_postgres_readonly() {
    check_readonly_rejects_writes("TEST_POSTGRES_DSN").await;
}

/// Read-only mode on a real MySQL server.
#[tokio::test]
#[ignore]
async fn test_mysql_readonly() {
    check_readonly_rejects_writes("TEST_MYSQL_DSN").await;
}

/// Read-only mode on a real SQL Server.
#[tokio::test]
#[ignore]
async fn test_sqlserver_readonly() {
    check_readonly_rejects_writes("TEST_SQLSERVER_DSN").await;
}

/// Schema resources resolve on every configured server.
#[tokio::test]
#[ignore]
async fn test_schema_resources_on_live_servers() {
    for var in [
        "TEST_POSTGRES_DSN",
        "TEST_MYSQL_DSN",
        "TEST_MARIADB_DSN",
        "TEST_SQLSERVER_DSN",
    ] {
        check_schema_resources(var).await;
    }
}
