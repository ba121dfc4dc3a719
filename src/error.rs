//! Error types for the DB gateway.
//!
//! Every failure that can cross a handler boundary is a [`DbError`]. Each variant
//! carries enough context to build a useful message for the AI client, and
//! [`DbError::code`] gives the stable machine code placed in response envelopes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid DSN '{redacted}': {message}. Expected one of: {}", samples.join(", "))]
    DsnFormat {
        message: String,
        /// Input with the password replaced, safe to print
        redacted: String,
        samples: Vec<String>,
    },

    #[error("{operation} failed: {message}")]
    Introspection { operation: String, message: String },

    #[error("SQL execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error(
        "Read-only mode: statement {statement_index} starts with '{keyword}', which is not allowed. Only {allowed} statements can run."
    )]
    ReadOnlyViolation {
        keyword: String,
        /// 1-based position inside the submitted batch
        statement_index: usize,
        allowed: String,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error(
        "Timeout: {operation} exceeded {}",
        elapsed_secs.map_or_else(|| "the configured connect timeout".to_string(), |s| format!("{s}s"))
    )]
    Timeout {
        operation: String,
        /// None when the driver reports the timeout without its limit
        elapsed_secs: Option<u64>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a DSN format error. `redacted` must already have its password masked.
    pub fn dsn_format(
        message: impl Into<String>,
        redacted: impl Into<String>,
        samples: Vec<String>,
    ) -> Self {
        Self::DsnFormat {
            message: message.into(),
            redacted: redacted.into(),
            samples,
        }
    }

    pub fn introspection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Introspection {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    pub fn read_only_violation(
        keyword: impl Into<String>,
        statement_index: usize,
        allowed: &[&str],
    ) -> Self {
        Self::ReadOnlyViolation {
            keyword: keyword.into(),
            statement_index,
            allowed: allowed
                .iter()
                .map(|k| k.to_uppercase())
                .collect::<Vec<_>>()
                .join("/"),
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: Some(elapsed_secs),
        }
    }

    /// A pool acquire timed out; the pool enforces the connect timeout itself.
    pub fn pool_timeout() -> Self {
        Self::Timeout {
            operation: "connection pool acquire".to_string(),
            elapsed_secs: None,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Re-type a failure raised by an introspection query, keeping its message.
    ///
    /// Not-found errors pass through untouched so callers can still tell a
    /// missing object apart from a failed catalog query.
    pub fn into_introspection(self, operation: &str) -> Self {
        match self {
            Self::NotFound { .. } | Self::Introspection { .. } => self,
            Self::Execution { message, .. } => Self::introspection(operation, message),
            Self::Connection { message, .. } => Self::introspection(operation, message),
            other => Self::introspection(operation, other.to_string()),
        }
    }

    /// Stable error code used in response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::DsnFormat { .. } => "DSN_FORMAT_ERROR",
            Self::Introspection { .. } => "INTROSPECTION_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::ReadOnlyViolation { .. } => "READONLY_VIOLATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::DsnFormat { .. } => {
                Some("Percent-encode special characters such as '@' or ':' in the password")
            }
            Self::ReadOnlyViolation { .. } => {
                Some("Restart the server without --readonly to run write statements")
            }
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::pool_timeout(),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Restart the server to reconnect")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify the sslmode parameter and server certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found in result: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert SQL Server driver errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match err {
            tiberius::error::Error::Server(token) => {
                DbError::execution(token.message().to_string(), Some(token.code().to_string()))
            }
            tiberius::error::Error::Io { kind, message } => DbError::connection(
                format!("I/O error ({:?}): {}", kind, message),
                "Check network connectivity and database server status",
            ),
            tiberius::error::Error::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Verify the sslmode parameter or use sslmode=require for self-signed certificates",
            ),
            tiberius::error::Error::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect directly to the routed host",
            ),
            other => DbError::internal(format!("SQL Server driver error: {}", other)),
        }
    }
}

impl From<bb8::RunError<bb8_tiberius::Error>> for DbError {
    fn from(err: bb8::RunError<bb8_tiberius::Error>) -> Self {
        match err {
            bb8::RunError::User(bb8_tiberius::Error::Tiberius(e)) => e.into(),
            bb8::RunError::User(bb8_tiberius::Error::Io(e)) => DbError::connection(
                format!("I/O error: {}", e),
                "Check network connectivity and database server status",
            ),
            bb8::RunError::TimedOut => DbError::pool_timeout(),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for failures that cannot be expressed
/// as a response envelope (unknown resource address, no active connector).
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = suggestion_data(err.suggestion());
        match &err {
            DbError::InvalidInput { .. }
            | DbError::ReadOnlyViolation { .. }
            | DbError::DsnFormat { .. }
            | DbError::Execution { .. } => rmcp::ErrorData::invalid_params(err.to_string(), data),

            DbError::NotFound { .. } => rmcp::ErrorData::resource_not_found(err.to_string(), data),

            DbError::Connection { .. }
            | DbError::Timeout { .. }
            | DbError::Introspection { .. }
            | DbError::Internal { .. } => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}
