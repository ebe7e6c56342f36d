//! `BatchReader` / `BatchWriter` (spec.md §4.4, C4): fan out a logical
//! batch operation across the four backends, in parallel, aggregating
//! partial results under a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::adapter::{
    AdapterError, BackendAdapter, BackendKind, MockDocumentAdapter, MockGraphAdapter,
    MockRelationalAdapter, MockVectorAdapter, PutOptions,
};
use crate::model::{DocumentFragment, DocumentId};

/// Which backends a `get_all` call should fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendSelection {
    pub relational: bool,
    pub document: bool,
    pub vector: bool,
    pub graph: bool,
}

impl BackendSelection {
    pub fn all() -> Self {
        Self {
            relational: true,
            document: true,
            vector: true,
            graph: true,
        }
    }

    fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        if self.relational {
            kinds.push(BackendKind::Relational);
        }
        if self.document {
            kinds.push(BackendKind::Document);
        }
        if self.vector {
            kinds.push(BackendKind::Vector);
        }
        if self.graph {
            kinds.push(BackendKind::Graph);
        }
        kinds
    }
}

/// The four concrete adapters a batch call may fan out to.
#[derive(Clone)]
pub struct BatchAdapters {
    pub relational: Arc<MockRelationalAdapter>,
    pub document: Arc<MockDocumentAdapter>,
    pub vector: Arc<MockVectorAdapter>,
    pub graph: Arc<MockGraphAdapter>,
}

impl BatchAdapters {
    fn get(&self, kind: BackendKind) -> Arc<dyn BackendAdapter> {
        match kind {
            BackendKind::Relational => self.relational.clone(),
            BackendKind::Document => self.document.clone(),
            BackendKind::Vector => self.vector.clone(),
            BackendKind::Graph => self.graph.clone(),
        }
    }
}

/// Result of `BatchReader::get_all` (spec.md §4.4): partial success is
/// the normal case, not an error.
#[derive(Debug, Default)]
pub struct BatchReadResult {
    pub per_backend: HashMap<BackendKind, HashMap<DocumentId, DocumentFragment>>,
    pub errors: HashMap<BackendKind, AdapterError>,
}

pub struct BatchReader {
    adapters: BatchAdapters,
}

impl BatchReader {
    pub fn new(adapters: BatchAdapters) -> Self {
        Self { adapters }
    }

    /// Launches one concurrent task per requested backend. A global
    /// `deadline` governs the whole call; each backend gets a soft
    /// deadline of `deadline * 0.9` so the aggregator has time to
    /// return partial results (spec.md §4.4).
    pub async fn get_all(
        &self,
        ids: &[DocumentId],
        include: BackendSelection,
        deadline: Duration,
    ) -> BatchReadResult {
        let per_backend_deadline = deadline.mul_f64(0.9);
        let kinds = include.kinds();

        let tasks = kinds.iter().map(|kind| {
            let adapter = self.adapters.get(*kind);
            let ids = ids.to_vec();
            let kind = *kind;
            async move {
                let fut = fan_out_get_many(adapter, &ids);
                match tokio::time::timeout(per_backend_deadline, fut).await {
                    Ok(Ok(map)) => (kind, Ok(map)),
                    Ok(Err(err)) => (kind, Err(err)),
                    Err(_) => (
                        kind,
                        Err(AdapterError::Transient {
                            backend: kind,
                            cause: "per-backend deadline exceeded".to_string(),
                        }),
                    ),
                }
            }
        });

        let results = join_all(tasks).await;
        let mut out = BatchReadResult::default();
        for (kind, result) in results {
            match result {
                Ok(map) => {
                    out.per_backend.insert(kind, map);
                }
                Err(err) => {
                    out.errors.insert(kind, err);
                }
            }
        }
        out
    }
}

async fn fan_out_get_many(
    adapter: Arc<dyn BackendAdapter>,
    ids: &[DocumentId],
) -> Result<HashMap<DocumentId, DocumentFragment>, AdapterError> {
    let max_batch = adapter.max_batch_size();
    if ids.len() <= max_batch {
        return adapter.get_many(ids).await;
    }

    let mut merged = HashMap::new();
    for chunk in ids.chunks(max_batch) {
        merged.extend(adapter.get_many(chunk).await?);
    }
    Ok(merged)
}

/// Result of `BatchWriter::put_all` (spec.md §4.4).
#[derive(Debug, Default)]
pub struct BatchWriteResult {
    pub succeeded: Vec<BackendKind>,
    /// The first `Permanent` error encountered, if the batch was aborted.
    pub aborted_on: Option<(BackendKind, AdapterError)>,
}

pub struct BatchWriter {
    adapters: BatchAdapters,
}

impl BatchWriter {
    pub fn new(adapters: BatchAdapters) -> Self {
        Self { adapters }
    }

    /// Fans a per-backend fragment write out in parallel. Any
    /// `Permanent` per-backend error aborts the whole batch; the
    /// caller (the saga layer) is responsible for compensating the
    /// backends that already succeeded (spec.md §4.4).
    pub async fn put_all(
        &self,
        fragments_by_backend: HashMap<BackendKind, (DocumentId, DocumentFragment)>,
    ) -> BatchWriteResult {
        let tasks = fragments_by_backend.into_iter().map(|(kind, (id, fragment))| {
            let adapter = self.adapters.get(kind);
            async move {
                let result = adapter.put(id, fragment, PutOptions::default()).await;
                (kind, result)
            }
        });

        let results = join_all(tasks).await;
        let mut out = BatchWriteResult::default();
        for (kind, result) in results {
            match result {
                Ok(()) => out.succeeded.push(kind),
                Err(err) if !err.is_transient() => {
                    out.aborted_on = Some((kind, err));
                }
                Err(_) => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FragmentPayload;

    fn adapters() -> BatchAdapters {
        BatchAdapters {
            relational: Arc::new(MockRelationalAdapter::new()),
            document: Arc::new(MockDocumentAdapter::new()),
            vector: Arc::new(MockVectorAdapter::new()),
            graph: Arc::new(MockGraphAdapter::new()),
        }
    }

    #[tokio::test]
    async fn get_all_returns_partial_results_on_one_backend_error() {
        let adapters = adapters();
        adapters.vector.set_health(crate::adapter::Health::Down);
        adapters.vector.fail_next_put(AdapterError::Permanent {
            backend: BackendKind::Vector,
            cause: "down".to_string(),
        });

        let reader = BatchReader::new(adapters.clone());
        let id = DocumentId::new_v4();
        adapters
            .relational
            .put(
                id,
                DocumentFragment {
                    id,
                    owner_id: "alice".to_string(),
                    version: 1,
                    deleted_at: None,
                    payload: FragmentPayload::Relational { attributes: HashMap::new() },
                },
                PutOptions::default(),
            )
            .await
            .unwrap();

        let result = reader
            .get_all(&[id], BackendSelection::all(), Duration::from_secs(1))
            .await;
        assert!(result.per_backend.contains_key(&BackendKind::Relational));
        assert!(result.per_backend.contains_key(&BackendKind::Vector));
    }

    #[tokio::test]
    async fn put_all_aborts_batch_on_permanent_error() {
        let adapters = adapters();
        adapters.vector.fail_next_put(AdapterError::Permanent {
            backend: BackendKind::Vector,
            cause: "disk full".to_string(),
        });
        let writer = BatchWriter::new(adapters);

        let id = DocumentId::new_v4();
        let mut fragments = HashMap::new();
        fragments.insert(
            BackendKind::Relational,
            (
                id,
                DocumentFragment {
                    id,
                    owner_id: "alice".to_string(),
                    version: 1,
                    deleted_at: None,
                    payload: FragmentPayload::Relational { attributes: HashMap::new() },
                },
            ),
        );
        fragments.insert(
            BackendKind::Vector,
            (
                id,
                DocumentFragment {
                    id,
                    owner_id: "alice".to_string(),
                    version: 1,
                    deleted_at: None,
                    payload: FragmentPayload::Vector { vector: vec![0.1], metadata: HashMap::new() },
                },
            ),
        );

        let result = writer.put_all(fragments).await;
        assert!(result.aborted_on.is_some());
        assert!(result.succeeded.contains(&BackendKind::Relational));
    }
}
