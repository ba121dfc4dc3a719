//! SQL execution engine.
//!
//! Execution happens in two phases:
//! 1. [`ExecutionPlan::prepare`] segments the text and applies the read-only
//!    policy. Nothing touches the database in this phase, so a rejected batch
//!    never runs partially.
//! 2. [`execute_plan`] runs the plan. A single statement goes straight to the
//!    pool. A batch acquires one dedicated connection and runs every statement
//!    on it in source order, so temporary tables and session variables carry
//!    over between statements.
//!
//! A read-only plan runs each statement through the prepared protocol, which
//! the server refuses for text holding more than one command. Text that a
//! server splits differently from the segmenter, for example under MySQL's
//! `NO_BACKSLASH_ESCAPES`, therefore fails instead of running a hidden write.
//!
//! Backends plug in through [`SessionSource`] and [`StatementSession`].

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, SqlResult, SqlRow};
use crate::tools::sql_validator;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

/// Options applied to every SQL execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub readonly: bool,
}

impl ExecuteOptions {
    pub fn readonly(readonly: bool) -> Self {
        Self { readonly }
    }
}

/// Statements ready to run, already checked against the read-only policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    statements: Vec<String>,
    readonly: bool,
}

impl ExecutionPlan {
    pub fn prepare(sql: &str, db_type: DatabaseType, options: ExecuteOptions) -> DbResult<Self> {
        let statements = sql_validator::split_statements(sql, db_type);
        if statements.is_empty() {
            return Err(DbError::invalid_input("No SQL statements to execute"));
        }
        if options.readonly {
            sql_validator::validate_readonly(&statements, db_type)?;
        }
        Ok(Self {
            statements,
            readonly: options.readonly,
        })
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Whether statements must run one command at a time.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// A connection held for the duration of one batch.
///
/// Dropping the session returns the connection to its pool.
#[async_trait]
pub trait StatementSession: Send {
    /// Run one statement, returning its rows (empty if it returns none).
    async fn run(&mut self, sql: &str) -> DbResult<Vec<SqlRow>>;
}

/// A pool that can run one-off statements and hand out dedicated sessions.
#[async_trait]
pub trait SessionSource: Send + Sync {
    type Session: StatementSession;

    /// Run a single statement on any pooled connection.
    async fn run_single(&self, sql: &str) -> DbResult<Vec<SqlRow>>;

    /// Acquire a dedicated connection.
    async fn acquire(&self) -> DbResult<Self::Session>;
}

/// Run a prepared plan against a pool.
pub async fn execute_plan<S: SessionSource>(source: &S, plan: &ExecutionPlan) -> DbResult<SqlResult> {
    let start = Instant::now();

    let result = match plan.statements() {
        [single] => SqlResult::new(source.run_single(single).await?),
        statements => {
            let mut session = source.acquire().await?;
            let mut result = SqlResult::empty();
            for (idx, statement) in statements.iter().enumerate() {
                let rows = session.run(statement).await.inspect_err(|e| {
                    warn!(
                        statement = idx + 1,
                        total = statements.len(),
                        error = %e,
                        "Batch aborted"
                    );
                })?;
                result.extend(rows);
            }
            result
        }
    };

    debug!(
        statements = plan.statements().len(),
        rows = result.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "SQL executed"
    );
    Ok(result)
}

/// sqlx-backed sources for the Postgres and MySQL families.
///
/// A bare `&str` goes out as simple (multi-statement) text; [`sqlx::query`]
/// goes through the prepared protocol. Ad-hoc text is never cached.
pub mod sqlx_source {
    use super::*;
    use crate::db::types::RowToJson;
    use sqlx::pool::PoolConnection;
    use sqlx::{Executor, MySql, MySqlPool, PgPool, Postgres};

    macro_rules! fetch_rows {
        ($executor:expr, $sql:expr, $prepared:expr) => {{
            let rows = if $prepared {
                sqlx::query($sql).persistent(false).fetch_all($executor).await?
            } else {
                $executor.fetch_all($sql).await?
            };
            Ok(rows.iter().map(RowToJson::to_json_map).collect())
        }};
    }

    pub struct PgSource<'a> {
        pool: &'a PgPool,
        prepared: bool,
    }

    impl<'a> PgSource<'a> {
        pub fn new(pool: &'a PgPool, plan: &ExecutionPlan) -> Self {
            Self {
                pool,
                prepared: plan.is_readonly(),
            }
        }
    }

    pub struct PgSession {
        conn: PoolConnection<Postgres>,
        prepared: bool,
    }

    #[async_trait]
    impl StatementSession for PgSession {
        async fn run(&mut self, sql: &str) -> DbResult<Vec<SqlRow>> {
            fetch_rows!(&mut *self.conn, sql, self.prepared)
        }
    }

    #[async_trait]
    impl SessionSource for PgSource<'_> {
        type Session = PgSession;

        async fn run_single(&self, sql: &str) -> DbResult<Vec<SqlRow>> {
            fetch_rows!(self.pool, sql, self.prepared)
        }

        async fn acquire(&self) -> DbResult<Self::Session> {
            Ok(PgSession {
                conn: self.pool.acquire().await?,
                prepared: self.prepared,
            })
        }
    }

    pub struct MySqlSource<'a> {
        pool: &'a MySqlPool,
        prepared: bool,
    }

    impl<'a> MySqlSource<'a> {
        pub fn new(pool: &'a MySqlPool, plan: &ExecutionPlan) -> Self {
            Self {
                pool,
                prepared: plan.is_readonly(),
            }
        }
    }

    pub struct MySqlSession {
        conn: PoolConnection<MySql>,
        prepared: bool,
    }

    #[async_trait]
    impl StatementSession for MySqlSession {
        async fn run(&mut self, sql: &str) -> DbResult<Vec<SqlRow>> {
            fetch_rows!(&mut *self.conn, sql, self.prepared)
        }
    }

    #[async_trait]
    impl SessionSource for MySqlSource<'_> {
        type Session = MySqlSession;

        async fn run_single(&self, sql: &str) -> DbResult<Vec<SqlRow>> {
            fetch_rows!(self.pool, sql, self.prepared)
        }

        async fn acquire(&self) -> DbResult<Self::Session> {
            Ok(MySqlSession {
                conn: self.pool.acquire().await?,
                prepared: self.prepared,
            })
        }
    }
}
