//! Crate-wide error taxonomy.
//!
//! Every fallible core operation returns [`CoreError`]. Component-local error
//! enums (store, config, runtime) convert into it at the service boundary via
//! `From` impls, the same layering the rest of this codebase uses between a
//! narrow adapter error and the error type its callers actually see.

use thiserror::Error;

/// The seven-kind error taxonomy from the control-plane design: validation,
/// contract, not-found, concurrency, transient, permanent and fatal failures
/// each get their own variant so callers can match on remediation, not on
/// message text.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad input: unknown status value, empty capability set, invalid priority.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Invalid state-machine transition, circular dependency, same-status
    /// transition without `force`. Indicates a programming error in the caller.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Unknown id.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "agent" or "task".
        kind: &'static str,
        /// The id that was not found.
        id: String,
    },

    /// Optimistic conflict on a compare-and-set. Callers handle this locally
    /// (pick the next candidate) rather than surfacing it further.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Store/bus/runtime I/O error matching the retryable set.
    #[error("transient error: {0}")]
    Transient(String),

    /// Runtime error not in the retryable set.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Store unavailable at startup; the process should exit.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Builds a [`CoreError::NotFound`] for the given entity kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for error kinds the caller should retry (transient I/O).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                kind: "row",
                id: "<unknown>".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Transient(err.to_string()),
            other => Self::Permanent(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Crate-wide result alias used by every port trait and service method.
pub type DomainResult<T> = Result<T, CoreError>;
