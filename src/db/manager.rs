//! Connector manager.
//!
//! Owns the single active connector for the life of the process. It is built
//! once at startup and shared as an `Arc` with every handler, so tests can run
//! several independent managers side by side.

use crate::db::connector::{Connector, PoolSettings};
use crate::db::dsn::redact_dsn;
use crate::db::executor::ExecuteOptions;
use crate::db::registry::ConnectorRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, SqlResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Settings applied when the manager connects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerOptions {
    pub readonly: bool,
    pub pool: PoolSettings,
}

/// Holds the active connector. There is no reconnect; a failed connection
/// means restarting the process.
pub struct ConnectorManager {
    registry: ConnectorRegistry,
    active: RwLock<Option<Arc<dyn Connector>>>,
    options: ManagerOptions,
}

impl ConnectorManager {
    pub fn new(registry: ConnectorRegistry, options: ManagerOptions) -> Self {
        Self {
            registry,
            active: RwLock::new(None),
            options,
        }
    }

    /// Manager with an already-connected connector installed.
    pub fn with_connector(connector: Arc<dyn Connector>, options: ManagerOptions) -> Self {
        Self {
            registry: ConnectorRegistry::with_defaults(),
            active: RwLock::new(Some(connector)),
            options,
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn is_read_only(&self) -> bool {
        self.options.readonly
    }

    /// Resolve the DSN, create its connector and connect it.
    ///
    /// Connection establishment (pool creation plus liveness probe) is bounded
    /// by the configured connect timeout.
    pub async fn connect(&self, raw_dsn: &str) -> DbResult<Arc<dyn Connector>> {
        if self.active.read().await.is_some() {
            return Err(DbError::connection(
                "A connector is already active",
                "Restart the server to connect to a different database",
            ));
        }

        let (descriptor, dsn) = self.registry.resolve(raw_dsn)?;
        info!(
            connector = descriptor.id(),
            dsn = %redact_dsn(raw_dsn),
            "Connecting to database"
        );

        let connector = (descriptor.create)(self.options.pool);
        let timeout = self.options.pool.connect_timeout;
        let start = Instant::now();
        match tokio::time::timeout(timeout, connector.connect(&dsn)).await {
            Ok(result) => result?,
            Err(_) => {
                // the pool may have been created before the probe stalled
                let _ = connector.disconnect().await;
                return Err(DbError::timeout(
                    format!("connecting to {}", descriptor.display_name()),
                    timeout.as_secs(),
                ));
            }
        }

        info!(
            connector = descriptor.id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Connected"
        );

        *self.active.write().await = Some(Arc::clone(&connector));
        Ok(connector)
    }

    /// The active connector.
    pub async fn connector(&self) -> DbResult<Arc<dyn Connector>> {
        self.active.read().await.clone().ok_or_else(|| {
            DbError::connection(
                "No active database connection",
                "Start the server with a valid --dsn",
            )
        })
    }

    pub async fn database_type(&self) -> DbResult<DatabaseType> {
        Ok(self.connector().await?.database_type())
    }

    /// Run a SQL text on the active connector under the manager's read-only policy.
    pub async fn execute_sql(&self, sql: &str) -> DbResult<SqlResult> {
        let connector = self.connector().await?;
        connector
            .execute_sql(sql, ExecuteOptions::readonly(self.options.readonly))
            .await
    }

    /// Disconnect and drop the active connector.
    pub async fn disconnect(&self) -> DbResult<()> {
        let Some(connector) = self.active.write().await.take() else {
            return Ok(());
        };
        let start = Instant::now();
        connector.disconnect().await.inspect_err(|e| {
            warn!(error = %e, "Disconnect failed");
        })?;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Disconnected"
        );
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        self.options.pool.connect_timeout
    }
}

impl std::fmt::Debug for ConnectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorManager")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_active_connector() {
        let manager = ConnectorManager::new(ConnectorRegistry::with_defaults(), Default::default());
        let err = manager.connector().await.err().unwrap();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(manager.execute_sql("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_dsn_before_connecting() {
        let manager = ConnectorManager::new(ConnectorRegistry::with_defaults(), Default::default());
        let err = manager.connect("nope://u:secret@h/db").await.err().unwrap();
        assert!(matches!(err, DbError::DsnFormat { .. }));
        assert!(!err.to_string().contains("secret"));
        assert!(manager.connector().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connector_is_noop() {
        let manager = ConnectorManager::new(ConnectorRegistry::with_defaults(), Default::default());
        manager.disconnect().await.unwrap();
    }
}
