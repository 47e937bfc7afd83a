//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error raised when a business operation is rejected.
///
/// A rejected operation never emits events, so every variant here means
/// "nothing changed". Infrastructure failures live in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input was malformed independent of aggregate state (empty name, bad email).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A business precondition did not hold for the current aggregate state.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The operation requires an initialized aggregate.
    #[error("not found")]
    NotFound,

    /// The aggregate has already been initialized.
    #[error("already exists")]
    AlreadyExists,

    /// Stale version / optimistic concurrency.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
