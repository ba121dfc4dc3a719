//! PostgreSQL connector.
//!
//! Catalog queries go through `information_schema` where it is complete and
//! fall back to `pg_catalog` for index keys and routine sources.

use crate::db::connector::{
    Connector, ConnectorDescriptor, DefinitionStep, PoolSettings, PoolSlot, connection_failed,
    introspection, resolve_definition,
};
use crate::db::dsn::Dsn;
use crate::db::executor::{ExecuteOptions, ExecutionPlan, execute_plan, sqlx_source::PgSource};
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, IndexColumnRow, ProcedureKind, SqlResult, SslMode, StoredProcedure, TableColumn,
    TableIndex, parse_nullable,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::ready;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info};

mod queries {
    pub const CURRENT_SCHEMA: &str = "SELECT current_schema()::text";

    pub const SCHEMAS: &str = r#"
        SELECT schema_name::text
        FROM information_schema.schemata
        WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        AND schema_name NOT LIKE 'pg_temp_%'
        AND schema_name NOT LIKE 'pg_toast_temp_%'
        ORDER BY schema_name
        "#;

    pub const TABLES: &str = r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = $1
        AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#;

    pub const TABLE_EXISTS: &str = r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = $2
        )
        "#;

    pub const COLUMNS: &str = r#"
        SELECT
            column_name::text AS column_name,
            data_type::text AS data_type,
            is_nullable::text AS is_nullable,
            column_default::text AS column_default
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
        "#;

    // One row per index key column; indkey is 0-based
    pub const INDEX_COLUMNS: &str = r#"
        SELECT
            i.relname::text AS index_name,
            a.attname::text AS column_name,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary,
            array_position(ix.indkey::int2[], a.attnum)::int8 AS seq_in_index
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname = $2 AND n.nspname = $1
        ORDER BY i.relname, seq_in_index
        "#;

    pub const PROCEDURES: &str = r#"
        SELECT DISTINCT routine_name::text
        FROM information_schema.routines
        WHERE routine_schema = $1
        AND routine_type IN ('PROCEDURE', 'FUNCTION')
        ORDER BY routine_name
        "#;

    pub const PROCEDURE_DETAIL: &str = r#"
        SELECT
            r.routine_name::text AS routine_name,
            r.routine_type::text AS routine_type,
            lower(COALESCE(r.external_language, 'sql'))::text AS language,
            r.data_type::text AS return_type,
            r.routine_definition::text AS definition,
            (
                SELECT string_agg(
                    concat_ws(' ', p.parameter_name, p.parameter_mode, p.data_type),
                    ', ' ORDER BY p.ordinal_position
                )
                FROM information_schema.parameters p
                WHERE p.specific_schema = r.specific_schema
                AND p.specific_name = r.specific_name
            )::text AS parameter_list
        FROM information_schema.routines r
        WHERE r.routine_schema = $1 AND r.routine_name = $2
        LIMIT 1
        "#;

    pub const FUNCTION_DEF: &str = r#"
        SELECT pg_get_functiondef(p.oid)::text
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname = $1 AND p.proname = $2
        LIMIT 1
        "#;

    pub const PROSRC: &str = r#"
        SELECT p.prosrc::text
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname = $1 AND p.proname = $2
        LIMIT 1
        "#;
}

/// Connection settings parsed from a `postgres://` DSN.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: SslMode,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("ssl_mode", &self.ssl_mode)
            .finish_non_exhaustive()
    }
}

impl PostgresConfig {
    pub fn from_dsn(dsn: &Dsn) -> DbResult<Self> {
        if !DatabaseType::Postgres.schemes().contains(&dsn.scheme.as_str()) {
            return Err(DbError::dsn_format(
                format!("'{}' is not a PostgreSQL scheme", dsn.scheme),
                dsn.redacted(),
                vec![DatabaseType::Postgres.sample_dsn().to_string()],
            ));
        }

        Ok(Self {
            host: dsn.host.clone(),
            port: dsn.port_or(DatabaseType::Postgres.default_port()),
            database: dsn.database.clone(),
            user: dsn.user.clone(),
            password: dsn.password.clone(),
            ssl_mode: dsn.ssl_mode(),
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .ssl_mode(match self.ssl_mode {
                SslMode::Prefer => PgSslMode::Prefer,
                SslMode::Disable => PgSslMode::Disable,
                SslMode::Require => PgSslMode::Require,
                SslMode::Verify => PgSslMode::VerifyFull,
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
        db_type: DatabaseType::Postgres,
        schemes: DatabaseType::Postgres.schemes(),
        sample_dsn: DatabaseType::Postgres.sample_dsn(),
        validate: |dsn| PostgresConfig::from_dsn(dsn).map(|_| ()),
        create: |settings| Arc::new(PostgresConnector::new(settings)),
    }
}

pub struct PostgresConnector {
    pool: PoolSlot<PgPool>,
    settings: PoolSettings,
}

impl PostgresConnector {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            pool: PoolSlot::new(DatabaseType::Postgres),
            settings,
        }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, dsn: &Dsn) -> DbResult<()> {
        let config = PostgresConfig::from_dsn(dsn)?;

        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(config.connect_options())
            .await
            .map_err(|e| connection_failed(DatabaseType::Postgres, e))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(connection_failed(DatabaseType::Postgres, e));
        }

        if let Some(old) = self.pool.replace(pool).await {
            old.close().await;
        }
        info!(host = %config.host, port = config.port, "PostgreSQL pool ready");
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
        Ok(sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&pool)
            .await?)
    }

    async fn current_schema(&self) -> DbResult<Option<String>> {
        let pool = self.pool.get().await?;
        introspection("current_schema", catalog::current_schema(&pool).await)
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
        let plan = ExecutionPlan::prepare(sql, DatabaseType::Postgres, options)?;
        let pool = self.pool.get().await?;
        execute_plan(&PgSource::new(&pool, &plan), &plan).await
    }
}

mod catalog {
    use super::*;

    pub async fn current_schema(pool: &PgPool) -> DbResult<Option<String>> {
        Ok(sqlx::query_scalar::<_, Option<String>>(queries::CURRENT_SCHEMA)
            .fetch_one(pool)
            .await?)
    }

    async fn schema_or_current(pool: &PgPool, schema: Option<&str>) -> DbResult<String> {
        if let Some(schema) = schema {
            return Ok(schema.to_string());
        }
        current_schema(pool).await?.ok_or_else(|| {
            DbError::invalid_input(
                "No schema given and the session has no current schema (check search_path)",
            )
        })
    }

    pub async fn schemas(pool: &PgPool) -> DbResult<Vec<String>> {
        Ok(sqlx::query_scalar::<_, String>(queries::SCHEMAS)
            .fetch_all(pool)
            .await?)
    }

    pub async fn tables(pool: &PgPool, schema: Option<&str>) -> DbResult<Vec<String>> {
        let schema = schema_or_current(pool, schema).await?;
        let tables = sqlx::query_scalar::<_, String>(queries::TABLES)
            .bind(&schema)
            .fetch_all(pool)
            .await?;
        debug!(schema = %schema, count = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    pub async fn table_exists(pool: &PgPool, table: &str, schema: Option<&str>) -> DbResult<bool> {
        let schema = schema_or_current(pool, schema).await?;
        Ok(sqlx::query_scalar::<_, bool>(queries::TABLE_EXISTS)
            .bind(&schema)
            .bind(table)
            .fetch_one(pool)
            .await?)
    }

    pub async fn columns(
        pool: &PgPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableColumn>> {
        let schema = schema_or_current(pool, schema).await?;
        let rows = sqlx::query(queries::COLUMNS)
            .bind(&schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<TableColumn> {
                let nullable: String = row.try_get("is_nullable")?;
                Ok(TableColumn::new(
                    row.try_get::<String, _>("column_name")?,
                    row.try_get::<String, _>("data_type")?,
                    parse_nullable(&nullable),
                )
                .with_default(row.try_get("column_default")?))
            })
            .collect()
    }

    pub async fn indexes(
        pool: &PgPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableIndex>> {
        let schema = schema_or_current(pool, schema).await?;
        let rows = sqlx::query(queries::INDEX_COLUMNS)
            .bind(&schema)
            .bind(table)
            .fetch_all(pool)
            .await?;

        let rows = rows
            .iter()
            .map(|row| -> DbResult<IndexColumnRow> {
                Ok(IndexColumnRow::new(
                    row.try_get::<String, _>("index_name")?,
                    row.try_get::<String, _>("column_name")?,
                    row.try_get::<Option<i64>, _>("seq_in_index")?
                        .unwrap_or_default(),
                )
                .with_flags(row.try_get("is_unique")?, row.try_get("is_primary")?))
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(TableIndex::group_rows(rows))
    }

    pub async fn procedures(pool: &PgPool, schema: Option<&str>) -> DbResult<Vec<String>> {
        let schema = schema_or_current(pool, schema).await?;
        Ok(sqlx::query_scalar::<_, String>(queries::PROCEDURES)
            .bind(&schema)
            .fetch_all(pool)
            .await?)
    }

    async fn optional_text(
        pool: &PgPool,
        sql: &'static str,
        schema: &str,
        name: &str,
    ) -> DbResult<Option<String>> {
        Ok(sqlx::query_scalar::<_, Option<String>>(sql)
            .bind(schema)
            .bind(name)
            .fetch_optional(pool)
            .await?
            .flatten())
    }

    pub async fn procedure_detail(
        pool: &PgPool,
        name: &str,
        schema: Option<&str>,
    ) -> DbResult<StoredProcedure> {
        let schema = schema_or_current(pool, schema).await?;
        let row = sqlx::query(queries::PROCEDURE_DETAIL)
            .bind(&schema)
            .bind(name)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::not_found("Procedure", name))?;

        let kind = ProcedureKind::parse(&row.try_get::<String, _>("routine_type")?);
        let catalog_definition: Option<String> = row.try_get("definition")?;

        let steps: Vec<DefinitionStep<'_>> = vec![
            ("routine_definition", ready(Ok(catalog_definition)).boxed()),
            (
                "pg_get_functiondef",
                optional_text(pool, queries::FUNCTION_DEF, &schema, name).boxed(),
            ),
            ("prosrc", optional_text(pool, queries::PROSRC, &schema, name).boxed()),
        ];
        let definition = resolve_definition(name, steps).await;

        Ok(StoredProcedure::new(
            row.try_get::<String, _>("routine_name")?,
            kind,
            row.try_get::<String, _>("language")?,
        )
        .with_parameters(row.try_get("parameter_list")?)
        .with_return_type(row.try_get("return_type")?)
        .with_definition(definition))
    }
}
