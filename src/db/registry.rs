//! Scheme-keyed table of available connectors.

use crate::db::connector::ConnectorDescriptor;
use crate::db::dsn::{self, Dsn};
use crate::db::{mariadb, mysql, postgres, sqlserver};
use crate::error::{DbError, DbResult};
use std::collections::HashMap;

/// Maps DSN schemes to registered connectors.
///
/// Entries are only ever added. A scheme can belong to at most one connector.
#[derive(Debug, Default)]
pub struct ConnectorRegistry {
    descriptors: Vec<ConnectorDescriptor>,
    by_scheme: HashMap<&'static str, usize>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for descriptor in [
            postgres::descriptor(),
            mysql::descriptor(),
            mariadb::descriptor(),
            sqlserver::descriptor(),
        ] {
            // built-in schemes are disjoint
            let _ = registry.register(descriptor);
        }
        registry
    }

    /// Add a connector. Fails without changes if any of its schemes is taken.
    pub fn register(&mut self, descriptor: ConnectorDescriptor) -> DbResult<()> {
        if let Some(taken) = descriptor
            .schemes
            .iter()
            .find(|s| self.by_scheme.contains_key(**s))
        {
            return Err(DbError::internal(format!(
                "Scheme '{}' is already registered",
                taken
            )));
        }

        let idx = self.descriptors.len();
        for scheme in descriptor.schemes {
            self.by_scheme.insert(*scheme, idx);
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn find_by_scheme(&self, scheme: &str) -> Option<&ConnectorDescriptor> {
        self.by_scheme
            .get(scheme.to_ascii_lowercase().as_str())
            .map(|&idx| &self.descriptors[idx])
    }

    /// Which connector handles this raw DSN, judged by its scheme prefix.
    pub fn find_for_dsn(&self, raw: &str) -> Option<&ConnectorDescriptor> {
        dsn::scheme_of(raw).and_then(|scheme| self.find_by_scheme(&scheme))
    }

    pub fn descriptors(&self) -> &[ConnectorDescriptor] {
        &self.descriptors
    }

    /// One sample DSN per registered connector, in registration order.
    pub fn sample_dsns(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .map(|d| d.sample_dsn.to_string())
            .collect()
    }

    /// Route a raw DSN to its connector and run that connector's parser.
    ///
    /// Every failure is a [`DbError::DsnFormat`] carrying the redacted input
    /// and all sample DSNs.
    pub fn resolve(&self, raw: &str) -> DbResult<(&ConnectorDescriptor, Dsn)> {
        let format_error = |message: String| {
            DbError::dsn_format(message, dsn::redact_dsn(raw), self.sample_dsns())
        };

        let scheme = dsn::scheme_of(raw)
            .ok_or_else(|| format_error("missing '<scheme>://' prefix".to_string()))?;
        let descriptor = self
            .find_by_scheme(&scheme)
            .ok_or_else(|| format_error(format!("unsupported scheme '{}'", scheme)))?;
        let parsed = Dsn::parse(raw).map_err(format_error)?;
        (descriptor.validate)(&parsed).map_err(|e| match e {
            DbError::DsnFormat { message, .. } => format_error(message),
            other => format_error(other.to_string()),
        })?;

        Ok((descriptor, parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;

    #[test]
    fn test_defaults_cover_all_families() {
        let registry = ConnectorRegistry::with_defaults();
        assert_eq!(registry.descriptors().len(), 4);
        assert_eq!(registry.sample_dsns().len(), 4);
        for db in DatabaseType::ALL {
            assert_eq!(registry.find_by_scheme(db.id()).unwrap().db_type, db);
        }
    }

    #[test]
    fn test_postgresql_alias() {
        let registry = ConnectorRegistry::with_defaults();
        let d = registry.find_for_dsn("postgresql://u@h/db").unwrap();
        assert_eq!(d.db_type, DatabaseType::Postgres);
    }

    #[test]
    fn test_duplicate_scheme_rejected() {
        let mut registry = ConnectorRegistry::with_defaults();
        let err = registry.register(mysql::descriptor()).unwrap_err();
        assert!(err.to_string().contains("mysql"));
        assert_eq!(registry.descriptors().len(), 4);
    }

    #[test]
    fn test_resolve_unknown_scheme() {
        let registry = ConnectorRegistry::with_defaults();
        let err = registry.resolve("oracle://u:pw@h/db").unwrap_err();
        match err {
            DbError::DsnFormat {
                redacted, samples, ..
            } => {
                assert_eq!(redacted, "oracle://u:****@h/db");
                assert_eq!(samples.len(), 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_missing_scheme_lists_samples() {
        let registry = ConnectorRegistry::with_defaults();
        let message = registry.resolve("localhost/db").unwrap_err().to_string();
        for db in DatabaseType::ALL {
            assert!(message.contains(db.sample_dsn()));
        }
    }

    #[test]
    fn test_resolve_ok() {
        let registry = ConnectorRegistry::with_defaults();
        let (descriptor, dsn) = registry.resolve("mariadb://u:p@h/db").unwrap();
        assert_eq!(descriptor.db_type, DatabaseType::MariaDb);
        assert_eq!(dsn.host, "h");
    }
}
