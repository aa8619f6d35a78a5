//! Domain error model.

use thiserror::Error;

/// Result type used across the engine.
pub type DomainResult<T> = Result<T, DomainError>;

/// Engine-level failure.
///
/// Every public engine operation reports failures through this type. None of the
/// variants represent a crash: callers can always inspect the reason and decide
/// whether to correct the input, re-read state, or retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A named movement/business check rejected the request.
    #[error("{check}: {reason}")]
    Denied { check: String, reason: String },

    /// A unit, location, order or batch id did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target entity is no longer in the expected state (e.g. batch not ongoing).
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// A concurrent mutation of the same entity won the race; retrying may succeed.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// The operation would break a data invariant (e.g. negative weight).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The acting user lacks a required permission.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl DomainError {
    pub fn denied(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Denied {
            check: check.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Whether the same request may succeed if simply issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Concurrency(_))
    }

    /// Short stable name of the error class, used in logs and queued-command reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Denied { .. } => "denied",
            DomainError::NotFound(_) => "not_found",
            DomainError::StateConflict(_) => "state_conflict",
            DomainError::Concurrency(_) => "concurrency",
            DomainError::InvariantViolation(_) => "invariant",
            DomainError::Validation(_) => "validation",
            DomainError::Unauthorized(_) => "unauthorized",
        }
    }
}
