//! The connector abstraction.
//!
//! A [`Connector`] wraps one backend's native pool and exposes the same
//! introspection and execution operations over that backend's catalog views.
//! Each backend module also exports a [`ConnectorDescriptor`], which is what
//! the [`ConnectorRegistry`](crate::db::registry::ConnectorRegistry) stores.

use crate::db::dsn::Dsn;
use crate::db::executor::ExecuteOptions;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, SqlResult, StoredProcedure, TableColumn, TableIndex};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Uniform operation set implemented once per backend family.
///
/// `schema` arguments are optional everywhere. When absent, the connector
/// falls back to the connection's current schema (or current database for
/// the MySQL family), never to a hardcoded name.
#[async_trait]
pub trait Connector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Create the pool and run a liveness probe. Fails fast if the probe fails.
    async fn connect(&self, dsn: &Dsn) -> DbResult<()>;

    /// Close the pool. Calling this on a disconnected connector is a no-op.
    async fn disconnect(&self) -> DbResult<()>;

    async fn server_version(&self) -> DbResult<String>;

    /// The schema unqualified names resolve against, if the session has one.
    async fn current_schema(&self) -> DbResult<Option<String>>;

    async fn get_schemas(&self) -> DbResult<Vec<String>>;

    async fn get_tables(&self, schema: Option<&str>) -> DbResult<Vec<String>>;

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> DbResult<bool>;

    /// Columns in catalog ordinal order.
    async fn get_table_schema(&self, table: &str, schema: Option<&str>)
    -> DbResult<Vec<TableColumn>>;

    async fn get_table_indexes(&self, table: &str, schema: Option<&str>)
    -> DbResult<Vec<TableIndex>>;

    /// Names of stored procedures and functions.
    async fn get_stored_procedures(&self, schema: Option<&str>) -> DbResult<Vec<String>>;

    /// Fails with [`DbError::NotFound`] when no routine has this name.
    async fn get_stored_procedure_detail(
        &self,
        name: &str,
        schema: Option<&str>,
    ) -> DbResult<StoredProcedure>;

    async fn execute_sql(&self, sql: &str, options: ExecuteOptions) -> DbResult<SqlResult>;
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").finish_non_exhaustive()
    }
}

/// Pool sizing applied by every connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Registry entry for one backend family.
#[derive(Clone)]
pub struct ConnectorDescriptor {
    pub db_type: DatabaseType,
    /// DSN schemes this connector claims
    pub schemes: &'static [&'static str],
    pub sample_dsn: &'static str,
    /// Run the backend's own DSN parser without connecting
    pub validate: fn(&Dsn) -> DbResult<()>,
    pub create: fn(PoolSettings) -> Arc<dyn Connector>,
}

impl ConnectorDescriptor {
    pub fn id(&self) -> &'static str {
        self.db_type.id()
    }

    pub fn display_name(&self) -> &'static str {
        self.db_type.display_name()
    }
}

impl std::fmt::Debug for ConnectorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorDescriptor")
            .field("id", &self.id())
            .field("schemes", &self.schemes)
            .finish_non_exhaustive()
    }
}

/// Holds a connector's pool between `connect` and `disconnect`.
pub(crate) struct PoolSlot<P> {
    inner: RwLock<Option<P>>,
    db_type: DatabaseType,
}

impl<P: Clone> PoolSlot<P> {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            inner: RwLock::new(None),
            db_type,
        }
    }

    /// Clone the pool handle out of the slot.
    pub async fn get(&self) -> DbResult<P> {
        self.inner.read().await.clone().ok_or_else(|| {
            DbError::connection(
                format!("{} connector is not connected", self.db_type),
                "Connect before issuing queries",
            )
        })
    }

    /// Install a pool, returning the one it replaced.
    pub async fn replace(&self, pool: P) -> Option<P> {
        self.inner.write().await.replace(pool)
    }

    pub async fn take(&self) -> Option<P> {
        self.inner.write().await.take()
    }
}

/// Wrap a pool creation or liveness probe failure with a suggestion.
pub(crate) fn connection_failed(db_type: DatabaseType, error: impl std::fmt::Display) -> DbError {
    let message = error.to_string();
    let lower = message.to_lowercase();

    let suggestion = if lower.contains("connection refused") {
        format!("Check that the {} server is running and accessible", db_type)
    } else if lower.contains("authentication")
        || lower.contains("password")
        || lower.contains("login failed")
    {
        "Verify the username and password in the DSN".to_string()
    } else if lower.contains("does not exist")
        || lower.contains("unknown database")
        || lower.contains("cannot open database")
    {
        "Check that the database name exists".to_string()
    } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
        "Check the sslmode parameter: sslmode=disable turns TLS off, sslmode=require skips certificate verification".to_string()
    } else {
        format!("Verify the DSN format: {}", db_type.sample_dsn())
    };

    DbError::connection(format!("Failed to connect: {}", message), suggestion)
}

/// Log an introspection failure with its operation name and re-type it.
pub(crate) fn introspection<T>(operation: &'static str, result: DbResult<T>) -> DbResult<T> {
    result.map_err(|e| {
        warn!(operation, error = %e, "Introspection query failed");
        e.into_introspection(operation)
    })
}

/// One way of recovering a routine's source text.
pub type DefinitionStep<'a> = (&'static str, BoxFuture<'a, DbResult<Option<String>>>);

/// Try each definition source in order; the first non-blank result wins.
///
/// Step failures are swallowed. A routine without a recoverable definition
/// still exists, so this never fails.
pub async fn resolve_definition(routine: &str, steps: Vec<DefinitionStep<'_>>) -> Option<String> {
    for (step, lookup) in steps {
        match lookup.await {
            Ok(Some(definition)) if !definition.trim().is_empty() => {
                debug!(routine, step, "Resolved routine definition");
                return Some(definition);
            }
            Ok(_) => debug!(routine, step, "No definition from this source"),
            Err(e) => debug!(routine, step, error = %e, "Definition lookup failed"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_resolve_definition_first_non_empty_wins() {
        let calls = AtomicUsize::new(0);
        let steps: Vec<DefinitionStep<'_>> = vec![
            ("catalog", async { Ok(None) }.boxed()),
            ("show_create", async { Ok(Some("  ".to_string())) }.boxed()),
            ("body", async { Ok(Some("BEGIN END".to_string())) }.boxed()),
            (
                "never",
                async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("unreachable".to_string()))
                }
                .boxed(),
            ),
        ];
        let definition = resolve_definition("p", steps).await;
        assert_eq!(definition.as_deref(), Some("BEGIN END"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_definition_swallows_errors() {
        let steps: Vec<DefinitionStep<'_>> = vec![
            (
                "catalog",
                async { Err(DbError::execution("permission denied", None)) }.boxed(),
            ),
            ("body", async { Ok(Some("SELECT 1".to_string())) }.boxed()),
        ];
        assert_eq!(
            resolve_definition("f", steps).await.as_deref(),
            Some("SELECT 1")
        );
    }

    #[tokio::test]
    async fn test_resolve_definition_all_empty() {
        let steps: Vec<DefinitionStep<'_>> = vec![
            ("catalog", async { Ok(None) }.boxed()),
            (
                "body",
                async { Err(DbError::execution("no access", None)) }.boxed(),
            ),
        ];
        assert!(resolve_definition("f", steps).await.is_none());
    }

    #[tokio::test]
    async fn test_pool_slot_lifecycle() {
        let slot: PoolSlot<u32> = PoolSlot::new(DatabaseType::Postgres);
        assert!(matches!(slot.get().await, Err(DbError::Connection { .. })));
        assert_eq!(slot.replace(1).await, None);
        assert_eq!(slot.get().await.unwrap(), 1);
        assert_eq!(slot.take().await, Some(1));
        assert!(slot.get().await.is_err());
    }

    #[test]
    fn test_connection_failed_suggestions() {
        let err = connection_failed(DatabaseType::Postgres, "Connection refused (os error 111)");
        assert!(err.suggestion().unwrap().contains("PostgreSQL server is running"));

        let err = connection_failed(DatabaseType::SqlServer, "Login failed for user 'sa'");
        assert!(err.suggestion().unwrap().contains("username and password"));

        let err = connection_failed(DatabaseType::MySql, "something odd");
        assert!(err.suggestion().unwrap().contains("mysql://"));
    }

    #[test]
    fn test_introspection_retypes_but_keeps_not_found() {
        let err = introspection::<()>("get_tables", Err(DbError::execution("boom", None)))
            .unwrap_err();
        assert!(matches!(err, DbError::Introspection { .. }));
        assert!(err.to_string().contains("boom"));

        let err = introspection::<()>(
            "get_stored_procedure_detail",
            Err(DbError::not_found("Procedure", "p")),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }
}
