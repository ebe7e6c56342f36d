//! In-memory mock of the vector (ANN) backend.
//!
//! Cosine similarity over a brute-force scan stands in for a real ANN
//! index — fine for the coordinator's own test suite, which cares about
//! the contract (search ordering, filter composition, health/fault
//! injection), not index performance.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{DocumentFragment, DocumentId, FragmentPayload};
use crate::query::planner::{QueryableBackend, RankedId};
use crate::query::NativeFilter;

use super::{AdapterError, AdapterResult, BackendAdapter, BackendKind, Health, PutOptions};

#[derive(Default)]
struct Faults {
    fail_next_put: Option<AdapterError>,
    health: Option<Health>,
}

pub struct MockVectorAdapter {
    rows: RwLock<HashMap<DocumentId, DocumentFragment>>,
    faults: StdMutex<Faults>,
}

impl Default for MockVectorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVectorAdapter {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            faults: StdMutex::new(Faults::default()),
        }
    }

    pub fn fail_next_put(&self, err: AdapterError) {
        self.faults.lock().unwrap().fail_next_put = Some(err);
    }

    pub fn set_health(&self, health: Health) {
        self.faults.lock().unwrap().health = Some(health);
    }

    /// Backend-specific operation (spec.md §4.1).
    pub async fn upsert_vector(
        &self,
        id: DocumentId,
        vector: Vec<f32>,
        owner_id: String,
        metadata: HashMap<String, serde_json::Value>,
    ) -> AdapterResult<()> {
        self.rows.write().await.insert(
            id,
            DocumentFragment {
                id,
                owner_id,
                version: 1,
                deleted_at: None,
                payload: FragmentPayload::Vector { vector, metadata },
            },
        );
        Ok(())
    }

    /// Backend-specific operation: approximate nearest-neighbor search.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> AdapterResult<Vec<(DocumentId, f32)>> {
        let rows = self.rows.read().await;
        let mut scored: Vec<(DocumentId, f32)> = rows
            .values()
            .filter_map(|f| match &f.payload {
                FragmentPayload::Vector { vector, .. } => {
                    Some((f.id, cosine_similarity(query_vector, vector)))
                }
                _ => None,
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl BackendAdapter for MockVectorAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn get(&self, id: DocumentId) -> AdapterResult<DocumentFragment> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AdapterError::NotFound)
    }

    async fn get_many(
        &self,
        ids: &[DocumentId],
    ) -> AdapterResult<HashMap<DocumentId, DocumentFragment>> {
        let rows = self.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|f| (*id, f.clone())))
            .collect())
    }

    async fn exists(&self, ids: &[DocumentId]) -> AdapterResult<HashMap<DocumentId, bool>> {
        let rows = self.rows.read().await;
        Ok(ids.iter().map(|id| (*id, rows.contains_key(id))).collect())
    }

    async fn put(
        &self,
        id: DocumentId,
        fragment: DocumentFragment,
        options: PutOptions,
    ) -> AdapterResult<()> {
        if let Some(err) = self.faults.lock().unwrap().fail_next_put.take() {
            return Err(err);
        }
        let mut rows = self.rows.write().await;
        if let Some(expected) = options.if_version {
            if let Some(existing) = rows.get(&id) {
                if existing.version != expected {
                    return Err(AdapterError::VersionConflict {
                        expected,
                        actual: existing.version,
                    });
                }
            }
        }
        rows.insert(id, fragment);
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> AdapterResult<()> {
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn health(&self) -> Health {
        self.faults.lock().unwrap().health.unwrap_or(Health::Ok)
    }
}

#[async_trait]
impl QueryableBackend for MockVectorAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Vector
    }

    async fn execute_filter(&self, filter: &NativeFilter) -> AdapterResult<Vec<RankedId>> {
        let NativeFilter::Vector(query) = filter else {
            return Err(AdapterError::Permanent {
                backend: BackendKind::Vector,
                cause: "wrong native filter variant for vector adapter".to_string(),
            });
        };
        let rows = self.rows.read().await;
        let mut scored: Vec<(DocumentId, f32)> = rows
            .values()
            .filter_map(|f| match &f.payload {
                FragmentPayload::Vector { vector, metadata } => {
                    let mut fields = metadata.clone();
                    fields.insert("owner_id".to_string(), f.owner_id.clone().into());
                    if !query.filter.evaluate(&fields) {
                        return None;
                    }
                    let score = cosine_similarity(&query.query_vector, vector);
                    if let Some(threshold) = query.similarity_threshold {
                        if score < threshold {
                            return None;
                        }
                    }
                    Some((f.id, score))
                }
                _ => None,
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.k);
        // Rank ascending = better, so invert: best match gets rank 0.
        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (id, _score))| RankedId { id, rank: rank as f64 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_orders_by_similarity_descending() {
        let adapter = MockVectorAdapter::new();
        let id_a = DocumentId::new_v4();
        let id_b = DocumentId::new_v4();
        adapter
            .upsert_vector(id_a, vec![1.0, 0.0], "alice".into(), HashMap::new())
            .await
            .unwrap();
        adapter
            .upsert_vector(id_b, vec![0.0, 1.0], "alice".into(), HashMap::new())
            .await
            .unwrap();

        let results = adapter.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].0, id_a);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
