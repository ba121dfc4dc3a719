//! SQL Server connector using `tiberius` and a `bb8` connection pool.
//!
//! Parameters are positional (`@P1`, `@P2`). Batches run through the simple
//! query path so each statement may yield any number of result sets.

use crate::db::connector::{
    Connector, ConnectorDescriptor, DefinitionStep, PoolSettings, PoolSlot, connection_failed,
    introspection, resolve_definition,
};
use crate::db::dsn::Dsn;
use crate::db::executor::{
    ExecuteOptions, ExecutionPlan, SessionSource, StatementSession, execute_plan,
};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, IndexColumnRow, ProcedureKind, SqlResult, SqlRow, SslMode, StoredProcedure,
    TableColumn, TableIndex, parse_nullable,
};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_tiberius::ConnectionManager;
use futures_util::FutureExt;
use futures_util::future::ready;
use std::sync::Arc;
use tiberius::{AuthMethod, EncryptionLevel, Row, ToSql};
use tracing::{debug, info};

type MssqlPool = Pool<ConnectionManager>;
type Client = tiberius::Client<tokio_util::compat::Compat<tokio::net::TcpStream>>;

/// Value of the `authentication` DSN parameter that selects token auth.
pub const AAD_ACCESS_TOKEN_AUTH: &str = "azure-active-directory-access-token";

mod queries {
    pub const CURRENT_SCHEMA: &str = "SELECT SCHEMA_NAME() AS schema_name";

    pub const SCHEMAS: &str = r#"
        SELECT s.name AS schema_name
        FROM sys.schemas s
        WHERE s.name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest')
        AND s.name NOT LIKE 'db[_]%'
        ORDER BY s.name
        "#;

    pub const TABLES: &str = r#"
        SELECT TABLE_NAME AS table_name
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#;

    pub const TABLE_EXISTS: &str = r#"
        SELECT COUNT(*) AS cnt
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
        "#;

    pub const COLUMNS: &str = r#"
        SELECT
            COLUMN_NAME AS column_name,
            DATA_TYPE AS data_type,
            IS_NULLABLE AS is_nullable,
            COLUMN_DEFAULT AS column_default
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
        ORDER BY ORDINAL_POSITION
        "#;

    pub const INDEX_COLUMNS: &str = r#"
        SELECT
            i.name AS index_name,
            c.name AS column_name,
            i.is_unique AS is_unique,
            i.is_primary_key AS is_primary,
            CAST(ic.key_ordinal AS INT) AS seq_in_index
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        JOIN sys.tables t ON t.object_id = i.object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        WHERE s.name = @P1 AND t.name = @P2
        AND i.name IS NOT NULL
        AND ic.is_included_column = 0
        ORDER BY i.name, ic.key_ordinal
        "#;

    pub const PROCEDURES: &str = r#"
        SELECT ROUTINE_NAME AS routine_name
        FROM INFORMATION_SCHEMA.ROUTINES
        WHERE ROUTINE_SCHEMA = @P1 AND ROUTINE_TYPE IN ('PROCEDURE', 'FUNCTION')
        ORDER BY ROUTINE_NAME
        "#;

    pub const PROCEDURE_DETAIL: &str = r#"
        SELECT
            r.ROUTINE_NAME AS routine_name,
            r.ROUTINE_TYPE AS routine_type,
            LOWER(r.ROUTINE_BODY) AS language,
            r.DATA_TYPE AS return_type,
            r.ROUTINE_DEFINITION AS definition,
            STUFF((
                SELECT ', ' + p.PARAMETER_NAME + ' ' + p.PARAMETER_MODE + ' ' + p.DATA_TYPE
                FROM INFORMATION_SCHEMA.PARAMETERS p
                WHERE p.SPECIFIC_SCHEMA = r.SPECIFIC_SCHEMA
                AND p.SPECIFIC_NAME = r.SPECIFIC_NAME
                AND p.ORDINAL_POSITION > 0
                ORDER BY p.ORDINAL_POSITION
                FOR XML PATH(''), TYPE
            ).value('.', 'nvarchar(max)'), 1, 2, '') AS parameter_list
        FROM INFORMATION_SCHEMA.ROUTINES r
        WHERE r.ROUTINE_SCHEMA = @P1 AND r.ROUTINE_NAME = @P2
        "#;

    pub const OBJECT_DEFINITION: &str =
        "SELECT OBJECT_DEFINITION(OBJECT_ID(@P1)) AS definition";

    pub const SQL_MODULE: &str = r#"
        SELECT m.definition AS definition
        FROM sys.sql_modules m
        JOIN sys.objects o ON o.object_id = m.object_id
        JOIN sys.schemas s ON s.schema_id = o.schema_id
        WHERE s.name = @P1 AND o.name = @P2
        "#;
}

/// How the gateway authenticates to SQL Server.
#[derive(Clone, PartialEq, Eq)]
pub enum SqlServerAuth {
    SqlServer { user: String, password: String },
    /// Azure AD access token
    AadToken(String),
}

impl std::fmt::Debug for SqlServerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlServer { user, .. } => f
                .debug_struct("SqlServer")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::AadToken(_) => f.write_str("AadToken(..)"),
        }
    }
}

/// Connection settings parsed from a `sqlserver://` DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlServerConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub instance_name: Option<String>,
    pub auth: SqlServerAuth,
    pub ssl_mode: SslMode,
}

impl SqlServerConfig {
    pub fn from_dsn(dsn: &Dsn) -> DbResult<Self> {
        let format_error = |message: &str| {
            DbError::dsn_format(
                message,
                dsn.redacted(),
                vec![DatabaseType::SqlServer.sample_dsn().to_string()],
            )
        };

        if !DatabaseType::SqlServer.schemes().contains(&dsn.scheme.as_str()) {
            return Err(format_error("not a SQL Server scheme"));
        }

        let auth = match dsn.param("authentication") {
            Some(method) if method.eq_ignore_ascii_case(AAD_ACCESS_TOKEN_AUTH) => {
                let token = dsn
                    .param("access_token")
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        format_error("access-token authentication needs an access_token parameter")
                    })?;
                SqlServerAuth::AadToken(token.to_string())
            }
            Some(other) => {
                return Err(format_error(&format!(
                    "unsupported authentication '{}', expected '{}'",
                    other, AAD_ACCESS_TOKEN_AUTH
                )));
            }
            None => SqlServerAuth::SqlServer {
                user: dsn
                    .user
                    .clone()
                    .ok_or_else(|| format_error("a user name is required"))?,
                password: dsn.password.clone().unwrap_or_default(),
            },
        };

        Ok(Self {
            host: dsn.host.clone(),
            port: dsn.port_or(DatabaseType::SqlServer.default_port()),
            database: dsn.database.clone(),
            instance_name: dsn.param("instancename").map(String::from),
            auth,
            ssl_mode: dsn.ssl_mode(),
        })
    }

    pub fn tiberius_config(&self) -> tiberius::Config {
        let mut config = tiberius::Config::new();
        config.host(&self.host);
        config.port(self.port);
        if let Some(database) = &self.database {
            config.database(database);
        }
        if let Some(instance) = &self.instance_name {
            config.instance_name(instance);
        }

        match &self.auth {
            SqlServerAuth::SqlServer { user, password } => {
                config.authentication(AuthMethod::sql_server(user, password));
            }
            SqlServerAuth::AadToken(token) => {
                config.authentication(AuthMethod::aad_token(token));
            }
        }

        match self.ssl_mode {
            SslMode::Disable => config.encryption(EncryptionLevel::NotSupported),
            SslMode::Prefer => {
                config.encryption(EncryptionLevel::On);
                config.trust_cert();
            }
            SslMode::Require => {
                config.encryption(EncryptionLevel::Required);
                config.trust_cert();
            }
            SslMode::Verify => config.encryption(EncryptionLevel::Required),
        }

        config
    }
}

pub fn descriptor() -> ConnectorDescriptor {
    ConnectorDescriptor {
        db_type: DatabaseType::SqlServer,
        schemes: DatabaseType::SqlServer.schemes(),
        sample_dsn: DatabaseType::SqlServer.sample_dsn(),
        validate: |dsn| SqlServerConfig::from_dsn(dsn).map(|_| ()),
        create: |settings| Arc::new(SqlServerConnector::new(settings)),
    }
}

pub struct SqlServerConnector {
    pool: PoolSlot<MssqlPool>,
    settings: PoolSettings,
}

impl SqlServerConnector {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            pool: PoolSlot::new(DatabaseType::SqlServer),
            settings,
        }
    }
}

#[async_trait]
impl Connector for SqlServerConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    async fn connect(&self, dsn: &Dsn) -> DbResult<()> {
        let config = SqlServerConfig::from_dsn(dsn)?;

        let pool = Pool::builder()
            .max_size(self.settings.max_connections)
            .connection_timeout(self.settings.connect_timeout)
            .build(ConnectionManager::new(config.tiberius_config()))
            .await
            .map_err(|e| connection_failed(DatabaseType::SqlServer, e))?;

        // bb8 connects lazily, so this is the first real round trip
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| connection_failed(DatabaseType::SqlServer, e))?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| connection_failed(DatabaseType::SqlServer, e))?
                .into_results()
                .await
                .map_err(|e| connection_failed(DatabaseType::SqlServer, e))?;
        }

        self.pool.replace(pool).await;
        info!(host = %config.host, port = config.port, "SQL Server pool ready");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        // bb8 closes idle connections once the last pool handle drops
        self.pool.take().await;
        Ok(())
    }

    async fn server_version(&self) -> DbResult<String> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        let row = first_row(&mut conn, "SELECT @@VERSION AS version", &[]).await?;
        Ok(row
            .as_ref()
            .and_then(|r| get_string(r, "version"))
            .unwrap_or_default())
    }

    async fn current_schema(&self) -> DbResult<Option<String>> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection("current_schema", catalog::current_schema(&mut conn).await)
    }

    async fn get_schemas(&self) -> DbResult<Vec<String>> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection("get_schemas", catalog::schemas(&mut conn).await)
    }

    async fn get_tables(&self, schema: Option<&str>) -> DbResult<Vec<String>> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection("get_tables", catalog::tables(&mut conn, schema).await)
    }

    async fn table_exists(&self, table: &str, schema: Option<&str>) -> DbResult<bool> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection(
            "table_exists",
            catalog::table_exists(&mut conn, table, schema).await,
        )
    }

    async fn get_table_schema(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableColumn>> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection("get_table_schema", catalog::columns(&mut conn, table, schema).await)
    }

    async fn get_table_indexes(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableIndex>> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection("get_table_indexes", catalog::indexes(&mut conn, table, schema).await)
    }

    async fn get_stored_procedures(&self, schema: Option<&str>) -> DbResult<Vec<String>> {
        let pool = self.pool.get().await?;
        let mut conn = pool.get().await?;
        introspection(
            "get_stored_procedures",
            catalog::procedures(&mut conn, schema).await,
        )
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
        let plan = ExecutionPlan::prepare(sql, DatabaseType::SqlServer, options)?;
        let pool = self.pool.get().await?;
        execute_plan(&MssqlSource(&pool), &plan).await
    }
}

/// Run one statement through the simple query path, keeping rows of every result set.
async fn run_simple(client: &mut Client, sql: &str) -> DbResult<Vec<SqlRow>> {
    let results = client.simple_query(sql).await?.into_results().await?;
    Ok(results
        .iter()
        .flatten()
        .map(RowToJson::to_json_map)
        .collect())
}

struct MssqlSource<'a>(&'a MssqlPool);

/// A pooled connection owned for the length of a batch.
struct MssqlSession(PooledConnection<'static, ConnectionManager>);

#[async_trait]
impl StatementSession for MssqlSession {
    async fn run(&mut self, sql: &str) -> DbResult<Vec<SqlRow>> {
        run_simple(&mut self.0, sql).await
    }
}

#[async_trait]
impl SessionSource for MssqlSource<'_> {
    type Session = MssqlSession;

    async fn run_single(&self, sql: &str) -> DbResult<Vec<SqlRow>> {
        let mut conn = self.0.get().await?;
        run_simple(&mut conn, sql).await
    }

    async fn acquire(&self) -> DbResult<MssqlSession> {
        Ok(MssqlSession(self.0.get_owned().await?))
    }
}

async fn query_rows(client: &mut Client, sql: &str, params: &[&dyn ToSql]) -> DbResult<Vec<Row>> {
    Ok(client.query(sql, params).await?.into_first_result().await?)
}

async fn first_row(
    client: &mut Client,
    sql: &str,
    params: &[&dyn ToSql],
) -> DbResult<Option<Row>> {
    Ok(query_rows(client, sql, params).await?.into_iter().next())
}

fn get_string(row: &Row, column: &str) -> Option<String> {
    row.try_get::<&str, _>(column)
        .ok()
        .flatten()
        .map(String::from)
}

/// `[schema].[name]` with closing brackets escaped, as `QUOTENAME` would.
pub(crate) fn quote_name(schema: &str, name: &str) -> String {
    format!(
        "[{}].[{}]",
        schema.replace(']', "]]"),
        name.replace(']', "]]")
    )
}

mod catalog {
    use super::*;

    pub async fn current_schema(client: &mut Client) -> DbResult<Option<String>> {
        let row = first_row(client, queries::CURRENT_SCHEMA, &[]).await?;
        Ok(row.as_ref().and_then(|r| get_string(r, "schema_name")))
    }

    async fn schema_or_current(client: &mut Client, schema: Option<&str>) -> DbResult<String> {
        if let Some(schema) = schema {
            return Ok(schema.to_string());
        }
        current_schema(client)
            .await?
            .ok_or_else(|| DbError::invalid_input("No schema given and the login has no default schema"))
    }

    fn names(rows: &[Row], column: &str) -> Vec<String> {
        rows.iter().filter_map(|r| get_string(r, column)).collect()
    }

    pub async fn schemas(client: &mut Client) -> DbResult<Vec<String>> {
        let rows = query_rows(client, queries::SCHEMAS, &[]).await?;
        Ok(names(&rows, "schema_name"))
    }

    pub async fn tables(client: &mut Client, schema: Option<&str>) -> DbResult<Vec<String>> {
        let schema = schema_or_current(client, schema).await?;
        let rows = query_rows(client, queries::TABLES, &[&schema.as_str()]).await?;
        let tables = names(&rows, "table_name");
        debug!(schema = %schema, count = tables.len(), "Listed SQL Server tables");
        Ok(tables)
    }

    pub async fn table_exists(
        client: &mut Client,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<bool> {
        let schema = schema_or_current(client, schema).await?;
        let row = first_row(client, queries::TABLE_EXISTS, &[&schema.as_str(), &table]).await?;
        let count = row
            .as_ref()
            .and_then(|r| r.try_get::<i32, _>("cnt").ok().flatten())
            .unwrap_or(0);
        Ok(count > 0)
    }

    pub async fn columns(
        client: &mut Client,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableColumn>> {
        let schema = schema_or_current(client, schema).await?;
        let rows = query_rows(client, queries::COLUMNS, &[&schema.as_str(), &table]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                TableColumn::new(
                    get_string(row, "column_name").unwrap_or_default(),
                    get_string(row, "data_type").unwrap_or_default(),
                    parse_nullable(&get_string(row, "is_nullable").unwrap_or_default()),
                )
                .with_default(get_string(row, "column_default"))
            })
            .collect())
    }

    pub async fn indexes(
        client: &mut Client,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableIndex>> {
        let schema = schema_or_current(client, schema).await?;
        let rows = query_rows(client, queries::INDEX_COLUMNS, &[&schema.as_str(), &table]).await?;
        let rows = rows.iter().filter_map(|row| {
            let flag = |column: &str| row.try_get::<bool, _>(column).ok().flatten().unwrap_or(false);
            Some(
                IndexColumnRow::new(
                    get_string(row, "index_name")?,
                    get_string(row, "column_name")?,
                    row.try_get::<i32, _>("seq_in_index").ok().flatten()? as i64,
                )
                .with_flags(flag("is_unique"), flag("is_primary")),
            )
        });
        Ok(TableIndex::group_rows(rows))
    }

    pub async fn procedures(client: &mut Client, schema: Option<&str>) -> DbResult<Vec<String>> {
        let schema = schema_or_current(client, schema).await?;
        let rows = query_rows(client, queries::PROCEDURES, &[&schema.as_str()]).await?;
        Ok(names(&rows, "routine_name"))
    }

    async fn object_definition(pool: &MssqlPool, qualified: &str) -> DbResult<Option<String>> {
        let mut conn = pool.get().await?;
        let row = first_row(&mut conn, queries::OBJECT_DEFINITION, &[&qualified]).await?;
        Ok(row.as_ref().and_then(|r| get_string(r, "definition")))
    }

    async fn sql_module(pool: &MssqlPool, schema: &str, name: &str) -> DbResult<Option<String>> {
        let mut conn = pool.get().await?;
        let row = first_row(&mut conn, queries::SQL_MODULE, &[&schema, &name]).await?;
        Ok(row.as_ref().and_then(|r| get_string(r, "definition")))
    }

    pub async fn procedure_detail(
        pool: &MssqlPool,
        name: &str,
        schema: Option<&str>,
    ) -> DbResult<StoredProcedure> {
        let (schema, row) = {
            let mut conn = pool.get().await?;
            let schema = schema_or_current(&mut conn, schema).await?;
            let row = first_row(
                &mut conn,
                queries::PROCEDURE_DETAIL,
                &[&schema.as_str(), &name],
            )
            .await?
            .ok_or_else(|| DbError::not_found("Procedure", name))?;
            (schema, row)
        };

        let kind = ProcedureKind::parse(&get_string(&row, "routine_type").unwrap_or_default());
        let qualified = quote_name(&schema, name);

        let steps: Vec<DefinitionStep<'_>> = vec![
            (
                "routine_definition",
                ready(Ok(get_string(&row, "definition"))).boxed(),
            ),
            ("object_definition", object_definition(pool, &qualified).boxed()),
            ("sql_modules", sql_module(pool, &schema, name).boxed()),
        ];
        let definition = resolve_definition(name, steps).await;

        Ok(StoredProcedure::new(
            get_string(&row, "routine_name").unwrap_or_else(|| name.to_string()),
            kind,
            get_string(&row, "language").unwrap_or_else(|| "sql".to_string()),
        )
        .with_parameters(get_string(&row, "parameter_list"))
        .with_return_type(get_string(&row, "return_type"))
        .with_definition(definition))
    }
}
