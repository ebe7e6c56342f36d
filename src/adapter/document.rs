//! In-memory mock of the document (blob/JSON) backend.

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

pub struct MockDocumentAdapter {
    rows: RwLock<HashMap<DocumentId, DocumentFragment>>,
    blobs: RwLock<HashMap<DocumentId, Vec<u8>>>,
    faults: StdMutex<Faults>,
}

impl Default for MockDocumentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDocumentAdapter {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            blobs: RwLock::new(HashMap::new()),
            faults: StdMutex::new(Faults::default()),
        }
    }

    pub fn fail_next_put(&self, err: AdapterError) {
        self.faults.lock().unwrap().fail_next_put = Some(err);
    }

    pub fn set_health(&self, health: Health) {
        self.faults.lock().unwrap().health = Some(health);
    }

    /// Backend-specific operation (spec.md §4.1): store a blob's bytes.
    pub async fn put_blob(&self, id: DocumentId, bytes: Vec<u8>) -> AdapterResult<()> {
        self.blobs.write().await.insert(id, bytes);
        Ok(())
    }

    /// Backend-specific operation: retrieve a blob's bytes.
    pub async fn get_blob(&self, id: DocumentId) -> AdapterResult<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AdapterError::NotFound)
    }

    /// Backend-specific operation: remove a blob.
    pub async fn delete_blob(&self, id: DocumentId) -> AdapterResult<()> {
        self.blobs.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for MockDocumentAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
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
        if let FragmentPayload::Document { blob, .. } = &fragment.payload {
            self.blobs.write().await.insert(id, blob.clone());
        }
        rows.insert(id, fragment);
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> AdapterResult<()> {
        self.rows.write().await.remove(&id);
        self.blobs.write().await.remove(&id);
        Ok(())
    }

    async fn health(&self) -> Health {
        self.faults.lock().unwrap().health.unwrap_or(Health::Ok)
    }
}

#[async_trait]
impl QueryableBackend for MockDocumentAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn execute_filter(&self, filter: &NativeFilter) -> AdapterResult<Vec<RankedId>> {
        let NativeFilter::Document(query) = filter else {
            return Err(AdapterError::Permanent {
                backend: BackendKind::Document,
                cause: "wrong native filter variant for document adapter".to_string(),
            });
        };
        let rows = self.rows.read().await;
        let mut hits: Vec<RankedId> = rows
            .values()
            .filter(|f| {
                let mut fields = HashMap::new();
                fields.insert("id".to_string(), f.id.to_string().into());
                fields.insert("owner_id".to_string(), f.owner_id.clone().into());
                query.filter.evaluate(&fields)
            })
            .enumerate()
            .map(|(rank, f)| RankedId {
                id: f.id,
                rank: rank as f64,
            })
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: DocumentId, owner: &str, blob: &[u8]) -> DocumentFragment {
        DocumentFragment {
            id,
            owner_id: owner.to_string(),
            version: 1,
            deleted_at: None,
            payload: FragmentPayload::Document {
                blob: blob.to_vec(),
                content_type: "application/octet-stream".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn put_stores_blob_alongside_fragment() {
        let adapter = MockDocumentAdapter::new();
        let id = DocumentId::new_v4();
        adapter
            .put(id, fragment(id, "alice", b"\xDE\xAD\xBE\xEF"), PutOptions::default())
            .await
            .unwrap();

        let blob = adapter.get_blob(id).await.unwrap();
        assert_eq!(blob, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn delete_removes_fragment_and_blob() {
        let adapter = MockDocumentAdapter::new();
        let id = DocumentId::new_v4();
        adapter
            .put(id, fragment(id, "alice", b"data"), PutOptions::default())
            .await
            .unwrap();
        adapter.delete(id).await.unwrap();
        assert!(adapter.get(id).await.is_err());
        assert!(adapter.get_blob(id).await.is_err());
    }
}
