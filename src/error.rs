//! Coordinator-wide error taxonomy (spec.md §7).
//!
//! Each subsystem (adapters, cache, security, batch, query, saga,
//! streaming, archive) owns its own `thiserror` enum; `CoordinatorError`
//! is the union returned from every `CoordinatorAPI` entry point. Errors
//! carry a stable tag (the enum variant) plus a short diagnostic string —
//! no stack traces cross the public surface.

use uuid::Uuid;

use crate::adapter::{AdapterError, BackendKind};
use crate::saga::SagaId;
use crate::security::SecurityError;

/// Result alias for coordinator entry points.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// The full error taxonomy from spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("caller could not be authenticated")]
    Unauthenticated,

    #[error("caller lacks required permission: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("document not found: {0}")]
    NotFound(Uuid),

    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("concurrent saga already in flight for {0}")]
    Busy(Uuid),

    #[error("transient failure in {backend}: {cause}")]
    Transient { backend: BackendKind, cause: String },

    #[error("permanent failure in {backend}: {cause}")]
    Permanent { backend: BackendKind, cause: String },

    #[error("partial result: {errors:?}")]
    PartialResult {
        errors: Vec<(BackendKind, String)>,
    },

    #[error("saga {0} orphaned: compensation exhausted retries")]
    Orphaned(SagaId),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error (correlation_id={correlation_id}): {message}")]
    Internal {
        correlation_id: Uuid,
        message: String,
    },
}

impl CoordinatorError {
    /// Build an `Internal` error with a fresh correlation id, logging it
    /// for operator attention the way orphaned-during-a-live-call sagas
    /// must per spec.md §7's propagation policy.
    pub fn internal(message: impl Into<String>) -> Self {
        let correlation_id = Uuid::new_v4();
        let message = message.into();
        tracing::error!(%correlation_id, %message, "internal error");
        CoordinatorError::Internal {
            correlation_id,
            message,
        }
    }
}

impl From<SecurityError> for CoordinatorError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::Unauthenticated => CoordinatorError::Unauthenticated,
            SecurityError::Forbidden(reason) => CoordinatorError::Forbidden(reason),
            SecurityError::RateLimited { retry_after_ms } => {
                CoordinatorError::RateLimited { retry_after_ms }
            }
        }
    }
}

impl From<AdapterError> for CoordinatorError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::NotFound => {
                CoordinatorError::internal("adapter NotFound surfaced without context")
            }
            // `AdapterError::VersionConflict` carries no id, and every
            // `CoordinatorAPI` call site that can hit a version conflict
            // (`update`'s `if_version` check, saga steps) already has the
            // real id in scope and constructs `CoordinatorError::
            // VersionConflict` directly instead of routing through `?`. A
            // conflict reaching this `From` impl means an adapter call
            // outside that known set raced on version — there's no id to
            // attach, so it surfaces as `Internal` with the expected/actual
            // pair preserved for the operator rather than a fabricated id.
            AdapterError::VersionConflict { expected, actual } => CoordinatorError::internal(
                format!("version conflict surfaced without a document id: expected {expected}, found {actual}"),
            ),
            AdapterError::Transient { backend, cause } => {
                CoordinatorError::Transient { backend, cause }
            }
            AdapterError::Permanent { backend, cause } => {
                CoordinatorError::Permanent { backend, cause }
            }
        }
    }
}
