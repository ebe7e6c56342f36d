//! `BackendAdapter` contract and concrete adapters (spec.md §4.1, C1).
//!
//! The contract deliberately does **not** paper over semantic differences
//! between backends — each adapter exposes only the operations its store
//! can perform efficiently. Concrete backend drivers (a real SQL engine,
//! a graph query language, an ANN index, a blob HTTP API) are out of
//! scope per spec.md §1; what ships here is the trait contract plus one
//! in-memory mock per backend, exercising the same state machine a real
//! driver would need to honor.

pub mod document;
pub mod graph;
pub mod relational;
pub mod vector;

pub use document::MockDocumentAdapter;
pub use graph::MockGraphAdapter;
pub use relational::MockRelationalAdapter;
pub use vector::MockVectorAdapter;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::model::{DocumentFragment, DocumentId};

/// Which of the four stores an adapter (or an error) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Relational,
    Document,
    Vector,
    Graph,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Relational => "relational",
            BackendKind::Document => "document",
            BackendKind::Vector => "vector",
            BackendKind::Graph => "graph",
        };
        f.write_str(s)
    }
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Adapter error model (spec.md §4.1).
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("not found")]
    NotFound,

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("transient failure in {backend}: {cause}")]
    Transient { backend: BackendKind, cause: String },

    #[error("permanent failure in {backend}: {cause}")]
    Permanent { backend: BackendKind, cause: String },
}

impl AdapterError {
    /// Transient errors are safe to retry; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient { .. })
    }
}

/// Coarse backend health, reported by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Ok,
    Degraded,
    Down,
}

/// Options for `BackendAdapter::put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Optimistic-concurrency guard: the put fails with `VersionConflict`
    /// unless the stored fragment's current version matches.
    pub if_version: Option<u64>,
}

/// Operations every adapter provides (spec.md §4.1).
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Maximum ids/fragments accepted in one batch call. `BatchReader`/
    /// `BatchWriter` split oversized requests against this bound.
    fn max_batch_size(&self) -> usize {
        1000
    }

    async fn get(&self, id: DocumentId) -> AdapterResult<DocumentFragment>;

    /// Unknown ids are simply absent from the returned map.
    async fn get_many(
        &self,
        ids: &[DocumentId],
    ) -> AdapterResult<HashMap<DocumentId, DocumentFragment>>;

    async fn exists(&self, ids: &[DocumentId]) -> AdapterResult<HashMap<DocumentId, bool>>;

    /// Upsert semantics; `options.if_version` enables optimistic locking.
    async fn put(
        &self,
        id: DocumentId,
        fragment: DocumentFragment,
        options: PutOptions,
    ) -> AdapterResult<()>;

    /// Idempotent: deleting a missing id returns success.
    async fn delete(&self, id: DocumentId) -> AdapterResult<()>;

    async fn health(&self) -> Health;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_display() {
        assert_eq!(BackendKind::Relational.to_string(), "relational");
        assert_eq!(BackendKind::Vector.to_string(), "vector");
    }

    #[test]
    fn adapter_error_is_transient() {
        assert!(AdapterError::Transient {
            backend: BackendKind::Graph,
            cause: "timeout".into()
        }
        .is_transient());
        assert!(!AdapterError::NotFound.is_transient());
    }
}
