//! In-memory mock of the relational backend (spec.md §4.1).
//!
//! Grounded on `angzarr`'s `storage::mock::MockEventStore`: a
//! `tokio::sync::RwLock`-guarded `HashMap` plus boolean fault-injection
//! toggles so saga/batch tests can force transient and permanent
//! failures without a real database.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{DocumentFragment, DocumentId, FragmentPayload};
use crate::query::planner::{QueryableBackend, RankedId};
use crate::query::{FilterExpr, NativeFilter};

use super::{AdapterError, AdapterResult, BackendAdapter, BackendKind, Health, PutOptions};

/// Controls what the next operation(s) should do, for deterministic
/// fault-injection in tests (spec.md §8 concrete scenarios).
#[derive(Debug, Clone, Default)]
struct FaultInjection {
    fail_next_put: Option<AdapterError>,
    health: Option<Health>,
}

pub struct MockRelationalAdapter {
    rows: RwLock<HashMap<DocumentId, DocumentFragment>>,
    faults: StdMutex<FaultInjection>,
}

impl Default for MockRelationalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRelationalAdapter {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            faults: StdMutex::new(FaultInjection::default()),
        }
    }

    /// The next `put` call fails with the given error (one-shot).
    pub fn fail_next_put(&self, err: AdapterError) {
        self.faults.lock().unwrap().fail_next_put = Some(err);
    }

    pub fn set_health(&self, health: Health) {
        self.faults.lock().unwrap().health = Some(health);
    }

    fn attributes_of(fragment: &DocumentFragment) -> HashMap<String, serde_json::Value> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), fragment.id.to_string().into());
        fields.insert("owner_id".to_string(), fragment.owner_id.clone().into());
        if let FragmentPayload::Relational { attributes } = &fragment.payload {
            fields.extend(attributes.clone());
        }
        fields
    }
}

#[async_trait]
impl BackendAdapter for MockRelationalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
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
impl QueryableBackend for MockRelationalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn execute_filter(&self, filter: &NativeFilter) -> AdapterResult<Vec<RankedId>> {
        let NativeFilter::Relational(query) = filter else {
            return Err(AdapterError::Permanent {
                backend: BackendKind::Relational,
                cause: "wrong native filter variant for relational adapter".to_string(),
            });
        };
        let expr: &FilterExpr = &query.filter;
        let rows = self.rows.read().await;
        let mut hits: Vec<RankedId> = rows
            .values()
            .filter(|f| expr.evaluate(&Self::attributes_of(f)))
            .enumerate()
            .map(|(rank, f)| RankedId {
                id: f.id,
                rank: rank as f64,
            })
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RelationalFilterBuilder;

    fn fragment(id: DocumentId, owner: &str, title: &str) -> DocumentFragment {
        let mut attrs = HashMap::new();
        attrs.insert("title".to_string(), title.into());
        DocumentFragment {
            id,
            owner_id: owner.to_string(),
            version: 1,
            deleted_at: None,
            payload: FragmentPayload::Relational { attributes: attrs },
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let adapter = MockRelationalAdapter::new();
        let id = DocumentId::new_v4();
        adapter
            .put(id, fragment(id, "alice", "A"), PutOptions::default())
            .await
            .unwrap();
        let fetched = adapter.get(id).await.unwrap();
        assert_eq!(fetched.owner_id, "alice");
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let adapter = MockRelationalAdapter::new();
        let err = adapter.get(DocumentId::new_v4()).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound));
    }

    #[tokio::test]
    async fn version_conflict_on_stale_if_version() {
        let adapter = MockRelationalAdapter::new();
        let id = DocumentId::new_v4();
        adapter
            .put(id, fragment(id, "alice", "A"), PutOptions::default())
            .await
            .unwrap();

        let mut stale = fragment(id, "alice", "B");
        stale.version = 1;
        let err = adapter
            .put(id, stale, PutOptions { if_version: Some(99) })
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let adapter = MockRelationalAdapter::new();
        let id = DocumentId::new_v4();
        adapter.delete(id).await.unwrap();
        adapter.delete(id).await.unwrap();
    }

    #[tokio::test]
    async fn fail_next_put_is_one_shot() {
        let adapter = MockRelationalAdapter::new();
        adapter.fail_next_put(AdapterError::Permanent {
            backend: BackendKind::Relational,
            cause: "disk full".to_string(),
        });
        let id = DocumentId::new_v4();
        assert!(adapter
            .put(id, fragment(id, "alice", "A"), PutOptions::default())
            .await
            .is_err());
        assert!(adapter
            .put(id, fragment(id, "alice", "A"), PutOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn execute_filter_matches_attributes() {
        let adapter = MockRelationalAdapter::new();
        let id1 = DocumentId::new_v4();
        let id2 = DocumentId::new_v4();
        adapter
            .put(id1, fragment(id1, "alice", "A"), PutOptions::default())
            .await
            .unwrap();
        adapter
            .put(id2, fragment(id2, "alice", "B"), PutOptions::default())
            .await
            .unwrap();

        let query = RelationalFilterBuilder::new()
            .filter(|e| e.eq("title", "A"))
            .to_native();
        let hits = adapter
            .execute_filter(&NativeFilter::Relational(query))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id1);
    }
}
