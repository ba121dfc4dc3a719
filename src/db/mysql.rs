//! MySQL-family connector.
//!
//! Serves both MySQL and MariaDB. The two share catalog views and wire
//! protocol; [`crate::db::mariadb`] registers the same connector under its own
//! scheme and flavor.
//!
//! In this family "schema" and "database" are the same thing, so queries scope
//! with `COALESCE(?, DATABASE())` and an absent schema means the current one.

use crate::db::connector::{
    Connector, ConnectorDescriptor, DefinitionStep, PoolSettings, PoolSlot, connection_failed,
    introspection, resolve_definition,
};
use crate::db::dsn::Dsn;
use crate::db::executor::{ExecuteOptions, ExecutionPlan, execute_plan, sqlx_source::MySqlSource};
use crate::db::mariadb;
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, IndexColumnRow, ProcedureKind, SqlResult, SslMode, StoredProcedure, TableColumn,
    TableIndex, parse_nullable,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::ready;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Executor, MySqlPool, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};

mod queries {
    pub const CURRENT_DATABASE: &str = "SELECT DATABASE() AS SCHEMA_NAME";

    pub const SCHEMAS: &str = r#"
        SELECT CONVERT(SCHEMA_NAME USING utf8mb4) AS SCHEMA_NAME
        FROM information_schema.SCHEMATA
        WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
        ORDER BY SCHEMA_NAME
        "#;

    pub const TABLES: &str = r#"
        SELECT CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#;

    pub const TABLE_EXISTS: &str = r#"
        SELECT COUNT(*) AS CNT
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
        "#;

    pub const COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(DATA_TYPE USING utf8mb4) AS DATA_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#;

    pub const INDEX_COLUMNS: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8mb4) AS INDEX_NAME,
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            NON_UNIQUE,
            SEQ_IN_INDEX
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
        ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

    pub const PROCEDURES: &str = r#"
        SELECT CONVERT(ROUTINE_NAME USING utf8mb4) AS ROUTINE_NAME
        FROM information_schema.ROUTINES
        WHERE ROUTINE_SCHEMA = COALESCE(?, DATABASE())
        AND ROUTINE_TYPE IN ('PROCEDURE', 'FUNCTION')
        ORDER BY ROUTINE_NAME
        "#;

    // PARAMETERS ordinal 0 is a function's return value
    pub const PROCEDURE_DETAIL: &str = r#"
        SELECT
            CONVERT(r.ROUTINE_NAME USING utf8mb4) AS ROUTINE_NAME,
            CONVERT(r.ROUTINE_SCHEMA USING utf8mb4) AS ROUTINE_SCHEMA,
            CONVERT(r.ROUTINE_TYPE USING utf8mb4) AS ROUTINE_TYPE,
            CONVERT(LOWER(r.ROUTINE_BODY) USING utf8mb4) AS LANGUAGE,
            CONVERT(r.DTD_IDENTIFIER USING utf8mb4) AS RETURN_TYPE,
            CONVERT(r.ROUTINE_DEFINITION USING utf8mb4) AS DEFINITION,
            CONVERT((
                SELECT GROUP_CONCAT(
                    CONCAT_WS(' ', p.PARAMETER_NAME, p.PARAMETER_MODE, p.DTD_IDENTIFIER)
                    ORDER BY p.ORDINAL_POSITION SEPARATOR ', '
                )
                FROM information_schema.PARAMETERS p
                WHERE p.SPECIFIC_SCHEMA = r.ROUTINE_SCHEMA
                AND p.SPECIFIC_NAME = r.ROUTINE_NAME
                AND p.ORDINAL_POSITION > 0
            ) USING utf8mb4) AS PARAMETER_LIST
        FROM information_schema.ROUTINES r
        WHERE r.ROUTINE_SCHEMA = COALESCE(?, DATABASE()) AND r.ROUTINE_NAME = ?
        LIMIT 1
        "#;

    pub const PROC_BODY: &str = r#"
        SELECT CONVERT(body USING utf8mb4) AS BODY
        FROM mysql.proc
        WHERE db = ? AND name = ? AND type = ?
        LIMIT 1
        "#;
}

/// Connection settings parsed from a `mysql://` or `mariadb://` DSN.
#[derive(Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    pub flavor: DatabaseType,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: SslMode,
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("flavor", &self.flavor)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("ssl_mode", &self.ssl_mode)
            .finish_non_exhaustive()
    }
}

impl MySqlConfig {
    pub fn from_dsn(dsn: &Dsn, flavor: DatabaseType) -> DbResult<Self> {
        if !flavor.schemes().contains(&dsn.scheme.as_str()) {
            return Err(DbError::dsn_format(
                format!("'{}' is not a {} scheme", dsn.scheme, flavor.display_name()),
                dsn.redacted(),
                vec![flavor.sample_dsn().to_string()],
            ));
        }

        Ok(Self {
            flavor,
            host: dsn.host.clone(),
            port: dsn.port_or(flavor.default_port()),
            database: dsn.database.clone(),
            user: dsn.user.clone(),
            password: dsn.password.clone(),
            ssl_mode: dsn.ssl_mode(),
        })
    }

    /// TLS is on but the server certificate is not checked (`sslmode=require`).
    pub fn skips_certificate_verification(&self) -> bool {
        self.ssl_mode.skips_verification()
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .charset("utf8mb4")
            .ssl_mode(match self.ssl_mode {
                SslMode::Prefer => MySqlSslMode::Preferred,
                SslMode::Disable => MySqlSslMode::Disabled,
                SslMode::Require => MySqlSslMode::Required,
                SslMode::Verify => MySqlSslMode::VerifyIdentity,
            });
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        options
    }
}

pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor {
        db_type: DatabaseType::MySql,
        schemes: DatabaseType::MySql.schemes(),
        sample_dsn: DatabaseType::MySql.sample_dsn(),
        validate: |dsn| MySqlConfig::from_dsn(dsn, DatabaseType::MySql).map(|_| ()),
        create: |settings| Arc::new(MySqlConnector::new(DatabaseType::MySql, settings)),
    }
}

/// Connector for MySQL and MariaDB, distinguished by `flavor`.
pub struct MySqlConnector {
    flavor: DatabaseType,
    pool: PoolSlot<MySqlPool>,
    settings: PoolSettings,
}

impl MySqlConnector {
    pub fn new(flavor: DatabaseType, settings: PoolSettings) -> Self {
        Self {
            flavor,
            pool: PoolSlot::new(flavor),
            settings,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn database_type(&self) -> DatabaseType {
        self.flavor
    }

    async fn connect(&self, dsn: &Dsn) -> DbResult<()> {
        let config = MySqlConfig::from_dsn(dsn, self.flavor)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(config.connect_options())
            .await
            .map_err(|e| connection_failed(self.flavor, e))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(connection_failed(self.flavor, e));
        }

        if let Ok(version) = catalog::version(&pool).await {
            let is_mariadb = mariadb::is_mariadb_version(&version);
            if is_mariadb != (self.flavor == DatabaseType::MariaDb) {
                warn!(
                    scheme = %dsn.scheme,
                    version = %version,
                    "Server flavor does not match the DSN scheme"
                );
            }
        }

        if let Some(old) = self.pool.replace(pool).await {
            old.close().await;
        }
        info!(
            flavor = %self.flavor,
            host = %config.host,
            port = config.port,
            "MySQL-family pool ready"
        );
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if let Some(pool) = self.pool.take().await {
            pool.close().await;
        }
        Ok(())
    }

    async fn server_version(&self) -> DbResult<String> {
        let pool = self.pool.get().await?;
        catalog::version(&pool).await
    }

    async fn current_schema(&self) -> DbResult<Option<String>> {
        let pool = self.pool.get().await?;
        introspection("current_schema", catalog::current_database(&pool).await)
    }

    async fn get_schemas(&self) -> DbResult<Vec<String>> {
        let pool = self.pool.get().await?;
        introspection("get_schemas", catalog::schemas(&pool).await)
    }

    async fn get_tables(&self, schema: Option<&str>) -> DbResult<Vec<String>> {
        let pool = self.pool.get().await?;
        introspection("get_tables", catalog::tables(&pool, schema).await)
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> DbResult<bool> {
        let pool = self.pool.get().await?;
        introspection("table_exists", catalog::table_exists(&pool, table, schema).await)
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableColumn>> {
        let pool = self.pool.get().await?;
        introspection("get_table_schema", catalog::columns(&pool, table, schema).await)
    }

    async fn get_table_indexes(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableIndex>> {
        let pool = self.pool.get().await?;
        introspection("get_table_indexes", catalog::indexes(&pool, table, schema).await)
    }

    async fn get_stored_procedures(&self, schema: Option<&str>) -> DbResult<Vec<String>> {
        let pool = self.pool.get().await?;
        introspection("get_stored_procedures", catalog::procedures(&pool, schema).await)
    }

    async fn get_stored_procedure_detail(
        &self,
        name: &str,
        schema: Option<&str>,
    ) -> DbResult<StoredProcedure> {
        let pool = self.pool.get().await?;
        introspection(
            "get_stored_procedure_detail",
            catalog::procedure_detail(&pool, name, schema).await,
        )
    }

    async fn execute_sql(&self, sql: &str, options: ExecuteOptions) -> DbResult<SqlResult> {
        let plan = ExecutionPlan::prepare(sql, self.flavor, options)?;
        let pool = self.pool.get().await?;
        execute_plan(&MySqlSource::new(&pool, &plan), &plan).await
    }
}

/// Quote an identifier with backticks, doubling any embedded backtick.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

mod catalog {
    use super::*;

    /// First successful decode among `attempts`, or the last failure as an error.
    pub(super) fn first_decoded<T>(
        column: &str,
        attempts: impl IntoIterator<Item = Result<T, sqlx::Error>>,
    ) -> DbResult<T> {
        let mut last = None;
        for attempt in attempts {
            match attempt {
                Ok(value) => return Ok(value),
                Err(e) => last = Some(e),
            }
        }
        let detail = last.map_or_else(|| "no decoder".to_string(), |e| e.to_string());
        Err(DbError::internal(format!(
            "Failed to decode catalog column {column}: {detail}"
        )))
    }

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_optional_string(row: &MySqlRow, column: &str) -> DbResult<Option<String>> {
        let bytes_as_text = || {
            row.try_get::<Option<Vec<u8>>, _>(column).and_then(|bytes| {
                bytes
                    .map(String::from_utf8)
                    .transpose()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))
            })
        };
        first_decoded(column, [row.try_get::<Option<String>, _>(column), bytes_as_text()])
    }

    fn get_string(row: &MySqlRow, column: &str) -> DbResult<String> {
        get_optional_string(row, column)?
            .ok_or_else(|| DbError::internal(format!("Catalog column {column} is NULL")))
    }

    /// Integer catalog columns changed width and signedness across versions.
    fn get_i64(row: &MySqlRow, column: &str) -> DbResult<i64> {
        first_decoded(
            column,
            [
                row.try_get::<i64, _>(column),
                row.try_get::<u64, _>(column).map(|v| v as i64),
                row.try_get::<i32, _>(column).map(i64::from),
                row.try_get::<u32, _>(column).map(i64::from),
            ],
        )
    }

    fn collect_names(rows: &[MySqlRow], column: &str) -> DbResult<Vec<String>> {
        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            names.extend(get_optional_string(row, column)?);
        }
        Ok(names)
    }

    pub async fn version(pool: &MySqlPool) -> DbResult<String> {
        let row = sqlx::query("SELECT VERSION() AS VERSION")
            .fetch_one(pool)
            .await?;
        get_string(&row, "VERSION")
    }

    pub async fn current_database(pool: &MySqlPool) -> DbResult<Option<String>> {
        let row = pool.fetch_one(queries::CURRENT_DATABASE).await?;
        get_optional_string(&row, "SCHEMA_NAME")
    }

    async fn names(
        pool: &MySqlPool,
        sql: &'static str,
        schema: Option<&str>,
        column: &str,
    ) -> DbResult<Vec<String>> {
        let rows = sqlx::query(sql).bind(schema).fetch_all(pool).await?;
        collect_names(&rows, column)
    }

    pub async fn schemas(pool: &MySqlPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::SCHEMAS).fetch_all(pool).await?;
        collect_names(&rows, "SCHEMA_NAME")
    }

    pub async fn tables(pool: &MySqlPool, schema: Option<&str>) -> DbResult<Vec<String>> {
        let tables = names(pool, queries::TABLES, schema, "TABLE_NAME").await?;
        debug!(schema = ?schema, count = tables.len(), "Listed MySQL tables");
        Ok(tables)
    }

    pub async fn table_exists(
        pool: &MySqlPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<bool> {
        let row = sqlx::query(queries::TABLE_EXISTS)
            .bind(schema)
            .bind(table)
            .fetch_one(pool)
            .await?;
        Ok(get_i64(&row, "CNT")? > 0)
    }

    pub async fn columns(
        pool: &MySqlPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableColumn>> {
        let rows = sqlx::query(queries::COLUMNS)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(TableColumn::new(
                    get_string(row, "COLUMN_NAME")?,
                    get_string(row, "DATA_TYPE")?,
                    parse_nullable(&get_string(row, "IS_NULLABLE")?),
                )
                .with_default(get_optional_string(row, "COLUMN_DEFAULT")?))
            })
            .collect()
    }

    pub async fn indexes(
        pool: &MySqlPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableIndex>> {
        let rows = sqlx::query(queries::INDEX_COLUMNS)
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        let mut index_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            // functional key parts have no column name
            let Some(column_name) = get_optional_string(row, "COLUMN_NAME")? else {
                continue;
            };
            let index_name = get_string(row, "INDEX_NAME")?;
            let is_primary = index_name == "PRIMARY";
            let is_unique = get_i64(row, "NON_UNIQUE")? == 0;
            index_rows.push(
                IndexColumnRow::new(index_name, column_name, get_i64(row, "SEQ_IN_INDEX")?)
                    .with_flags(is_unique, is_primary),
            );
        }
        Ok(TableIndex::group_rows(index_rows))
    }

    pub async fn procedures(pool: &MySqlPool, schema: Option<&str>) -> DbResult<Vec<String>> {
        names(pool, queries::PROCEDURES, schema, "ROUTINE_NAME").await
    }

    async fn show_create(
        pool: &MySqlPool,
        kind: ProcedureKind,
        schema: &str,
        name: &str,
    ) -> DbResult<Option<String>> {
        let sql = format!(
            "SHOW CREATE {} {}.{}",
            kind.as_sql_keyword(),
            quote_identifier(schema),
            quote_identifier(name)
        );
        let column = match kind {
            ProcedureKind::Procedure => "Create Procedure",
            ProcedureKind::Function => "Create Function",
        };
        let row = pool.fetch_optional(sql.as_str()).await?;
        Ok(row.map(|row| get_optional_string(&row, column)).transpose()?.flatten())
    }

    async fn proc_body(
        pool: &MySqlPool,
        kind: ProcedureKind,
        schema: &str,
        name: &str,
    ) -> DbResult<Option<String>> {
        let row = sqlx::query(queries::PROC_BODY)
            .bind(schema)
            .bind(name)
            .bind(kind.as_sql_keyword())
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|row| get_optional_string(&row, "BODY")).transpose()?.flatten())
    }

    pub async fn procedure_detail(
        pool: &MySqlPool,
        name: &str,
        schema: Option<&str>,
    ) -> DbResult<StoredProcedure> {
        let row = sqlx::query(queries::PROCEDURE_DETAIL)
            .bind(schema)
            .bind(name)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::not_found("Procedure", name))?;

        let kind = ProcedureKind::parse(&get_string(&row, "ROUTINE_TYPE")?);
        let routine_schema = get_string(&row, "ROUTINE_SCHEMA")?;
        let inline_definition = get_optional_string(&row, "DEFINITION")?;

        let steps: Vec<DefinitionStep<'_>> = vec![
            (
                "routine_definition",
                ready(Ok(inline_definition)).boxed(),
            ),
            (
                "show_create",
                show_create(pool, kind, &routine_schema, name).boxed(),
            ),
            ("mysql.proc", proc_body(pool, kind, &routine_schema, name).boxed()),
        ];
        let definition = resolve_definition(name, steps).await;

        Ok(
            StoredProcedure::new(get_string(&row, "ROUTINE_NAME")?, kind, get_string(&row, "LANGUAGE")?)
                .with_parameters(get_optional_string(&row, "PARAMETER_LIST")?)
                .with_return_type(get_optional_string(&row, "RETURN_TYPE")?)
                .with_definition(definition),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_decode_takes_first_success() {
        let value = catalog::first_decoded(
            "NON_UNIQUE",
            [Err(sqlx::Error::ColumnNotFound("NON_UNIQUE".into())), Ok(1_i64)],
        )
        .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_catalog_decode_failure_is_an_error() {
        // must not fall back to 0, which would read as a unique index
        let err = catalog::first_decoded::<i64>(
            "NON_UNIQUE",
            [
                Err(sqlx::Error::ColumnNotFound("NON_UNIQUE".into())),
                Err(sqlx::Error::Decode("mismatched types".into())),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DbError::Internal { .. }));
        let msg = err.to_string();
        assert!(msg.contains("NON_UNIQUE"), "{msg}");
        assert!(msg.contains("mismatched types"), "{msg}");
    }

    #[test]
    fn test_config_from_dsn() {
        let dsn = Dsn::parse("mysql://root:pw@127.0.0.1:3307/app?sslmode=disable").unwrap();
        let config = MySqlConfig::from_dsn(&dsn, DatabaseType::MySql).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3307);
        assert_eq!(config.database.as_deref(), Some("app"));
        assert_eq!(config.ssl_mode, SslMode::Disable);
        assert!(!config.skips_certificate_verification());
    }

    #[test]
    fn test_config_default_port() {
        let dsn = Dsn::parse("mysql://root@localhost/app").unwrap();
        let config = MySqlConfig::from_dsn(&dsn, DatabaseType::MySql).unwrap();
        assert_eq!(config.port, 3306);
    }

    #[test]
    fn test_config_rejects_other_flavor_scheme() {
        let dsn = Dsn::parse("mariadb://root@localhost/app").unwrap();
        assert!(MySqlConfig::from_dsn(&dsn, DatabaseType::MySql).is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("orders"), "`orders`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[tokio::test]
    async fn test_flavor_reported() {
        let connector = MySqlConnector::new(DatabaseType::MariaDb, PoolSettings::default());
        assert_eq!(connector.database_type(), DatabaseType::MariaDb);
        assert!(connector.get_tables(None).await.is_err());
    }
}
