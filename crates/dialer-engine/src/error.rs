//! Error types for the dialer engine
//!
//! Every fallible operation in the engine returns [`Result`], and every error
//! is classified into one of the [`DialerError`] variants below. The variants
//! matter operationally: [`DialerError::is_retryable`] tells callers whether
//! re-running the same operation can succeed without operator intervention.

use thiserror::Error;

/// Dialer engine errors
#[derive(Error, Debug)]
pub enum DialerError {
    /// Malformed input (unknown outcome code, bad queue type, invalid config value)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Concurrent-modification loser (double claim, duplicate open queue entry)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Legacy and specialized queue contents disagree beyond tolerance
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Transient storage failure (lock contention, busy database, pool timeout)
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unrecoverable state (corrupted migration flags); halts migration transitions
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Non-transient database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DialerError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new consistency error
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    /// Create a new transient store error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientStore(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a new database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether re-running the failed operation can succeed on its own.
    ///
    /// Conflicts are retryable because the losing side can re-read and retry;
    /// transient store errors are retryable because the contention they report
    /// clears. Everything else needs a code, data, or operator fix first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::TransientStore(_))
    }
}

impl From<sqlx::Error> for DialerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    Self::Conflict(format!("unique constraint violated: {msg}"))
                } else if msg.contains("database is locked") || msg.contains("database table is locked") {
                    Self::TransientStore(format!("database locked: {msg}"))
                } else {
                    Self::Database(msg.to_string())
                }
            }
            sqlx::Error::PoolTimedOut => {
                Self::TransientStore("connection pool timed out".to_string())
            }
            sqlx::Error::Io(io_err) => Self::TransientStore(format!("i/o error: {io_err}")),
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Result type for dialer engine operations
pub type Result<T> = std::result::Result<T, DialerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(DialerError::conflict("double claim").is_retryable());
        assert!(DialerError::transient("locked").is_retryable());
        assert!(!DialerError::validation("bad outcome").is_retryable());
        assert!(!DialerError::consistency("drift").is_retryable());
        assert!(!DialerError::fatal("corrupt flags").is_retryable());
        assert!(!DialerError::not_found("entry").is_retryable());
    }

    #[test]
    fn helper_constructors_produce_matching_variants() {
        assert!(matches!(DialerError::validation("x"), DialerError::Validation(_)));
        assert!(matches!(DialerError::conflict("x"), DialerError::Conflict(_)));
        assert!(matches!(DialerError::database("x"), DialerError::Database(_)));
    }
}
