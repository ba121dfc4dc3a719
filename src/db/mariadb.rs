//! MariaDB connector.
//!
//! MariaDB speaks the MySQL protocol and exposes the same `information_schema`
//! views, so it runs on [`MySqlConnector`] with the MariaDB flavor. Only the
//! scheme, DSN parsing and server detection live here.

use crate::db::connector::ConnectorDescriptor;
use crate::db::dsn::Dsn;
use crate::db::mysql::{MySqlConfig, MySqlConnector};
use crate::error::DbResult;
use crate::models::DatabaseType;
use std::sync::Arc;

/// Parse a `mariadb://` DSN.
pub fn parse_config(dsn: &Dsn) -> DbResult<MySqlConfig> {
    MySqlConfig::from_dsn(dsn, DatabaseType::MariaDb)
}

pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor {
        db_type: DatabaseType::MariaDb,
        schemes: DatabaseType::MariaDb.schemes(),
        sample_dsn: DatabaseType::MariaDb.sample_dsn(),
        validate: |dsn| parse_config(dsn).map(|_| ()),
        create: |settings| Arc::new(MySqlConnector::new(DatabaseType::MariaDb, settings)),
    }
}

/// `VERSION()` on MariaDB reads like "10.11.6-MariaDB-1:10.11.6+maria~ubu2204".
pub fn is_mariadb_version(version: &str) -> bool {
    version.to_ascii_lowercase().contains("mariadb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SslMode;

    #[test]
    fn test_require_skips_verification() {
        let dsn = Dsn::parse("mariadb://u:p@h:3310/db?sslmode=require").unwrap();
        let config = parse_config(&dsn).unwrap();
        assert_eq!(config.host, "h");
        assert_eq!(config.port, 3310);
        assert_eq!(config.database.as_deref(), Some("db"));
        assert_eq!(config.user.as_deref(), Some("u"));
        assert_eq!(config.password.as_deref(), Some("p"));
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert!(config.skips_certificate_verification());
        assert_eq!(config.flavor, DatabaseType::MariaDb);
    }

    #[test]
    fn test_default_port() {
        let dsn = Dsn::parse("mariadb://u:p@h/db").unwrap();
        assert_eq!(parse_config(&dsn).unwrap().port, 3306);
    }

    #[test]
    fn test_version_detection() {
        assert!(is_mariadb_version("10.11.6-MariaDB-1:10.11.6+maria~ubu2204"));
        assert!(!is_mariadb_version("8.0.36"));
    }
}
