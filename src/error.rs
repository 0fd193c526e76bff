//! Error types for fayl.

use thiserror::Error;

/// The main error type for fayl operations.
///
/// Every failure raised while running a named query carries the query code and
/// the phase that failed, so it can be diagnosed without retrying.
#[derive(Debug, Error)]
pub enum FaylError {
    /// The query root is missing or unreadable.
    #[error("Registry error: {0}")]
    Registry(String),

    /// No template is registered under the requested code.
    #[error("Unknown query code: '{0}'")]
    UnknownQuery(String),

    /// Template syntax error, undefined variable, or pagination rewrite failure.
    #[error("Compile error in '{code}': {message}")]
    Compile { code: String, message: String },

    /// Parameters have the wrong shape or do not match the placeholders.
    #[error("Bind error in '{code}': {message}")]
    Bind { code: String, message: String },

    /// The driver rejected or failed the statement.
    #[error("Execution error in '{code}' ({phase}): {source}")]
    Execute {
        code: String,
        phase: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A single-row destination received zero rows.
    #[error("No rows found for '{code}'")]
    NotFound { code: String },

    /// Rows could not be decoded into the requested destination.
    #[error("Decode error in '{code}': {message}")]
    Decode { code: String, message: String },

    /// Begin, commit or rollback failed at the driver.
    #[error("Failed to {op} transaction: {source}")]
    Transaction {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// The context does not carry a transaction handle.
    #[error("Failed to {0}, transaction not found in context")]
    TransactionNotFound(&'static str),

    /// The context already carries a transaction handle.
    #[error("Nested transactions are not supported")]
    NestedTransaction,

    /// The transaction was already committed or rolled back.
    #[error("Failed to {0}, transaction already finished")]
    TransactionFinished(&'static str),

    /// The primary error, plus the rollback that failed after it.
    #[error("{cause} (rollback also failed: {rollback})")]
    RollbackFailed {
        cause: Box<FaylError>,
        rollback: Box<FaylError>,
    },

    /// The context deadline elapsed during a round trip.
    #[error("Operation '{0}' cancelled: deadline exceeded")]
    Cancelled(String),

    /// Application error returned from a transaction callback.
    #[error(transparent)]
    Callback(#[from] anyhow::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FaylError {
    /// Create a compile error for the given query code.
    pub fn compile(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compile {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a bind error for the given query code.
    pub fn bind(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a decode error for the given query code.
    pub fn decode(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap a driver error raised while executing `code`.
    pub fn execute(code: impl Into<String>, phase: &'static str, source: sqlx::Error) -> Self {
        Self::Execute {
            code: code.into(),
            phase,
            source,
        }
    }

    /// Wrap any application error so it can be returned from a transaction callback.
    pub fn callback(err: impl Into<anyhow::Error>) -> Self {
        Self::Callback(err.into())
    }

    /// True when a single-row destination found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the context deadline elapsed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Re-tag a compile or bind error raised without a query code.
    pub fn with_code(self, code: &str) -> Self {
        match self {
            Self::Compile { code: c, message } if c.is_empty() => Self::compile(code, message),
            Self::Bind { code: c, message } if c.is_empty() => Self::bind(code, message),
            other => other,
        }
    }
}

/// Result type alias for fayl operations.
pub type FaylResult<T> = Result<T, FaylError>;
