//! Error types for the query runner and schema operations.

use std::fmt;

use thiserror::Error;

use crate::statement::Value;

/// Result alias used throughout the crate.
pub type Result<T, E = RunnerError> = std::result::Result<T, E>;

/// What kind of schema object a [`RunnerError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    View,
    Column,
    PrimaryKey,
    Index,
    Unique,
    Check,
    Exclusion,
    ForeignKey,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Column => "column",
            ObjectKind::PrimaryKey => "primary key",
            ObjectKind::Index => "index",
            ObjectKind::Unique => "unique constraint",
            ObjectKind::Check => "check constraint",
            ObjectKind::Exclusion => "exclusion constraint",
            ObjectKind::ForeignKey => "foreign key",
        };
        f.write_str(name)
    }
}

/// Error reported by a [`Driver`](crate::driver::Driver) or
/// [`Connection`](crate::driver::Connection).
///
/// `code` carries the engine's native error code (SQLSTATE for PostgreSQL and
/// CockroachDB, the primary result code for SQLite, the server error number
/// for MySQL) so the runner can recognize retryable failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    pub code: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Whether the native error code equals `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Errors produced by the runner, the dialect synthesizers and the orchestrator.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The runner was released and cannot be used anymore.
    #[error("query runner already released, cannot run queries anymore")]
    AlreadyReleased,

    /// `start_transaction` was called while a transaction is active.
    #[error("transaction already started for the given connection, commit current transaction before starting a new one")]
    TransactionAlreadyStarted,

    /// `commit_transaction` / `rollback_transaction` without an active transaction.
    #[error("transaction is not started yet, start transaction before committing or rolling it back")]
    TransactionNotStarted,

    /// The driver could not hand out or take back a connection.
    #[error("connection error: {0}")]
    Connection(#[source] DriverError),

    /// A statement failed inside the driver.
    #[error("query failed: {source} (sql: {sql})")]
    QueryFailed {
        sql: String,
        params: Vec<Value>,
        #[source]
        source: DriverError,
    },

    /// The dialect cannot express the requested operation.
    #[error("{dialect} does not support {feature}")]
    UnsupportedOperation { feature: String, dialect: String },

    /// A schema object that an operation depends on does not exist.
    #[error("{kind} \"{name}\" was not found")]
    NotFound { kind: ObjectKind, name: String },

    /// A required option was not provided.
    #[error("required option \"{option}\" is not set")]
    ConfigurationMissing { option: String },

    /// An optional driver package is not compiled in.
    #[error("package \"{package}\" is not available, enable the matching cargo feature")]
    DependencyMissing { package: String },

    /// The change would drop and re-add a column, destroying its data.
    #[error("changing column \"{column}\" of \"{table}\" drops its data ({reason}); enable allow_lossy_column_changes to proceed")]
    LossyChange {
        table: String,
        column: String,
        reason: String,
    },

    /// The schema model violates an invariant.
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    /// A transaction listener failed.
    #[error("transaction listener failed: {message}")]
    Listener { message: String },

    /// Options could not be parsed.
    #[error("invalid runner options: {0}")]
    Options(#[from] serde_json::Error),
}

impl RunnerError {
    pub(crate) fn unsupported(feature: impl Into<String>, dialect: impl Into<String>) -> Self {
        RunnerError::UnsupportedOperation {
            feature: feature.into(),
            dialect: dialect.into(),
        }
    }

    pub(crate) fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        RunnerError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RunnerError::InvalidSchema {
            message: message.into(),
        }
    }

    /// The driver error behind a [`RunnerError::QueryFailed`], if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            RunnerError::QueryFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
