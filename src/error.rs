//! Error types for dbkit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants carry enough context (SQLSTATE, suggestions, names) for callers to decide
//! how to react; nothing in this crate retries on its own.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    /// Unique, foreign-key, not-null or check violation, message verbatim from the backend.
    #[error("Constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Database '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    TransactionState {
        message: String,
        transaction_id: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Batch insert stopped at batch {batch_index} after {committed_rows} committed rows: {source}")]
    Batch {
        committed_rows: u64,
        batch_index: usize,
        #[source]
        source: Box<DbError>,
    },

    #[error("Cache error: {message}")]
    Cache { message: String },

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

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a constraint violation error.
    pub fn constraint_violation(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a duplicate registry name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a transaction state error.
    pub fn transaction_state(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Wrap the error that stopped a batch insert.
    pub fn batch(committed_rows: u64, batch_index: usize, source: DbError) -> Self {
        Self::Batch {
            committed_rows,
            batch_index,
            source: Box::new(source),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Batch { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// SQLSTATE reported by the backend, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } | Self::ConstraintViolation { sql_state, .. } => {
                sql_state.as_deref()
            }
            Self::Batch { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Check if this error is retryable. Classification only: callers own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Rows committed before a batch insert failed (zero for every other error).
    pub fn committed_rows(&self) -> u64 {
        match self {
            Self::Batch { committed_rows, .. } => *committed_rows,
            _ => 0,
        }
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
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => {
                        DbError::constraint_violation(db_err.message(), code)
                    }
                    _ => DbError::database(
                        db_err.message(),
                        code,
                        "Check the SQL syntax and referenced objects",
                    ),
                }
            }
            sqlx::Error::RowNotFound => DbError::not_found("No rows returned"),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 0),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reopen the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
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

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::serialization(err.to_string())
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
