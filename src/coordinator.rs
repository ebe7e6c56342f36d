//! `CoordinatorAPI` (spec.md §4.9, §6.1, C9): the narrow public surface
//! composing security → cache → saga execution → audit for every
//! entry point.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::adapter::{
    BackendKind, Health, MockDocumentAdapter, MockGraphAdapter, MockRelationalAdapter,
    MockVectorAdapter,
};
use crate::archive::ArchiveManager;
use crate::batch::{BackendSelection, BatchAdapters, BatchReader};
use crate::cache::{document_key, Cache, CacheStats};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::model::{Document, DocumentId, RetentionPolicy};
use crate::query::{JoinKind, NativeFilter, PolyglotPlanner, PolyglotResult, QueryableBackend};
use crate::saga::{Adapters as SagaAdapters, IdLockMode, SagaCoordinator, SagaKind, SagaStore};
use crate::security::{Access, AuditSink, AuthProvider, Permission, RateLimiter, SecurityGate};
use crate::streaming::{AppendOutcome, StreamingEngine, UploadId, UploadProgress};

/// Input to `create`/`upsert` (spec.md §6.1).
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    pub attributes: HashMap<String, Value>,
    pub blob: Option<Vec<u8>>,
    pub embedding: Option<Vec<f32>>,
    pub graph_labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Soft,
    Hard,
}

struct IdLocks {
    locks: StdMutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdLocks {
    fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: DocumentId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Composes C2–C8 behind the operation surface in spec.md §6.1.
pub struct CoordinatorAPI {
    security: SecurityGate,
    cache: Cache<Document>,
    saga_coordinator: SagaCoordinator,
    batch_reader: BatchReader,
    archive_manager: ArchiveManager,
    streaming: StreamingEngine,
    adapters: SagaAdapters,
    id_locks: IdLocks,
    in_flight_sagas: StdMutex<HashSet<DocumentId>>,
    config: CoordinatorConfig,
}

impl CoordinatorAPI {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        audit: Arc<dyn AuditSink>,
        saga_store: Arc<dyn SagaStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let adapters = SagaAdapters {
            relational: Arc::new(MockRelationalAdapter::new()),
            document: Arc::new(MockDocumentAdapter::new()),
            vector: Arc::new(MockVectorAdapter::new()),
            graph: Arc::new(MockGraphAdapter::new()),
        };

        let rate_limiter = RateLimiter::new(config.ratelimit.clone());
        let security = SecurityGate::new(auth, rate_limiter, audit);
        let cache = Cache::with_partitions(
            config.cache.capacity,
            config.cache.default_ttl,
            config.cache.partitions,
        );
        let saga_coordinator =
            SagaCoordinator::new(saga_store, adapters.clone(), config.saga.clone());
        let batch_reader = BatchReader::new(BatchAdapters {
            relational: adapters.relational.clone(),
            document: adapters.document.clone(),
            vector: adapters.vector.clone(),
            graph: adapters.graph.clone(),
        });

        Self {
            security,
            cache,
            saga_coordinator,
            batch_reader,
            archive_manager: ArchiveManager::new(),
            streaming: StreamingEngine::new(config.streaming.chunk_size, config.streaming.upload_ttl),
            adapters,
            id_locks: IdLocks::new(),
            in_flight_sagas: StdMutex::new(HashSet::new()),
            config,
        }
    }

    /// Starts every background task the coordinator owns (currently just
    /// the audit sink's drain loop). No work runs on construction; a
    /// caller must invoke this once before traffic arrives.
    pub fn start(&self) {
        self.security.start();
    }

    /// Stops every background task started by `start()`.
    pub fn stop(&self) {
        self.security.stop();
    }

    async fn with_id_lock<F, Fut, T>(&self, id: DocumentId, op: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let lock = self.id_locks.lock_for(id);
        let _guard = match self.config.saga.id_lock_mode {
            IdLockMode::Wait => lock.lock().await,
            IdLockMode::FailFast => match lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::warn!(%id, op, "concurrent saga on same id, fail-fast");
                    return Err(CoordinatorError::Busy(id));
                }
            },
        };
        self.in_flight_sagas.lock().unwrap().insert(id);
        let result = f().await;
        self.in_flight_sagas.lock().unwrap().remove(&id);
        result
    }

    fn is_in_flight(&self, id: DocumentId) -> bool {
        self.in_flight_sagas.lock().unwrap().contains(&id)
    }

    /// `create(input) -> {id}` (spec.md §6.1).
    pub async fn create(&self, credential: &str, input: DocumentInput) -> Result<DocumentId> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Write))
            .await?;

        let id = Uuid::new_v4();
        let context = build_write_context(id, &user.user_id, &input);

        let outcome = self
            .with_id_lock(id, "create", || async {
                let saga = self.saga_coordinator.run(SagaKind::CreateDocument, context).await;
                saga_to_result(saga, id)
            })
            .await;

        match &outcome {
            Ok(_) => self.security.audit(&user, "create", Some(id), "ok", None),
            Err(err) => self.security.audit(&user, "create", Some(id), "error", Some(err.to_string())),
        }
        outcome.map(|_| id)
    }

    /// `get(id, include_archived) -> Document | NotFound`.
    pub async fn get(&self, credential: &str, id: DocumentId, include_archived: bool) -> Result<Document> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Read))
            .await?;

        if !self.is_in_flight(id) {
            if let Some(doc) = self.cache.get(&document_key(id)) {
                if !doc.is_deleted() && (include_archived || !doc.is_archived()) {
                    self.security.audit(&user, "get", Some(id), "ok", None);
                    return Ok(doc);
                }
            }
        }

        let fragment = self
            .adapters
            .relational
            .get(id)
            .await
            .map_err(CoordinatorError::from)?;
        self.security
            .check_owner(&user, &fragment.owner_id)
            .map_err(|e| CoordinatorError::Forbidden(e.to_string()))?;

        let document = self.assemble_document(&fragment).await;

        if document.is_deleted() || (document.is_archived() && !include_archived) {
            self.security.audit(&user, "get", Some(id), "not_found", None);
            return Err(CoordinatorError::NotFound(id));
        }

        if !document.is_archived() {
            self.cache.put(document_key(id), document.clone(), None);
        }
        self.security.audit(&user, "get", Some(id), "ok", None);
        Ok(document)
    }

    /// `update(id, patch, if_version?) -> {new_version} | NotFound | VersionConflict`.
    pub async fn update(
        &self,
        credential: &str,
        id: DocumentId,
        patch: DocumentInput,
        if_version: Option<u64>,
    ) -> Result<u64> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Write))
            .await?;

        let existing = self.adapters.relational.get(id).await.map_err(CoordinatorError::from)?;
        self.security
            .check_owner(&user, &existing.owner_id)
            .map_err(|e| CoordinatorError::Forbidden(e.to_string()))?;

        if let Some(expected) = if_version {
            if expected != existing.version {
                return Err(CoordinatorError::VersionConflict {
                    id,
                    expected,
                    actual: existing.version,
                });
            }
        }

        let context = build_write_context(id, &existing.owner_id, &patch);
        let outcome = self
            .with_id_lock(id, "update", || async {
                let saga = self.saga_coordinator.run(SagaKind::UpdateDocument, context).await;
                saga_to_result(saga, id)
            })
            .await;

        self.cache.invalidate(&document_key(id));
        match &outcome {
            Ok(_) => self.security.audit(&user, "update", Some(id), "ok", None),
            Err(err) => self.security.audit(&user, "update", Some(id), "error", Some(err.to_string())),
        }
        outcome.map(|_| existing.version + 1)
    }

    /// `upsert(id, document) -> {id}`.
    pub async fn upsert(&self, credential: &str, id: DocumentId, input: DocumentInput) -> Result<DocumentId> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Write))
            .await?;

        if let Ok(existing) = self.adapters.relational.get(id).await {
            self.security
                .check_owner(&user, &existing.owner_id)
                .map_err(|e| CoordinatorError::Forbidden(e.to_string()))?;
        }

        let context = build_write_context(id, &user.user_id, &input);
        let outcome = self
            .with_id_lock(id, "upsert", || async {
                let saga = self.saga_coordinator.run(SagaKind::UpsertDocument, context).await;
                saga_to_result(saga, id)
            })
            .await;

        self.cache.invalidate(&document_key(id));
        match &outcome {
            Ok(_) => self.security.audit(&user, "upsert", Some(id), "ok", None),
            Err(err) => self.security.audit(&user, "upsert", Some(id), "error", Some(err.to_string())),
        }
        outcome.map(|_| id)
    }

    /// `delete(id, mode) -> Ok`: `Soft` tombstones the relational
    /// fragment and strips vector/graph projections; `Hard` additionally
    /// purges the blob, which is irreversible.
    pub async fn delete(&self, credential: &str, id: DocumentId, mode: DeleteMode) -> Result<()> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Delete))
            .await?;

        let existing = self.adapters.relational.get(id).await.map_err(CoordinatorError::from)?;
        self.security
            .check_owner(&user, &existing.owner_id)
            .map_err(|e| CoordinatorError::Forbidden(e.to_string()))?;

        let mut context = HashMap::new();
        context.insert("document_id".to_string(), id.to_string().into());
        context.insert("owner_id".to_string(), existing.owner_id.clone().into());

        let kind = match mode {
            DeleteMode::Soft => SagaKind::DeleteDocumentSoft,
            DeleteMode::Hard => SagaKind::DeleteDocumentHard,
        };

        let outcome = self
            .with_id_lock(id, "delete", || async {
                let saga = self.saga_coordinator.run(kind, context).await;
                saga_to_result(saga, id)
            })
            .await;

        self.cache.invalidate(&document_key(id));
        match &outcome {
            Ok(_) => self.security.audit(&user, "delete", Some(id), "ok", None),
            Err(err) => self.security.audit(&user, "delete", Some(id), "error", Some(err.to_string())),
        }
        outcome.map(|_| ())
    }

    /// `archive(id, policy) -> {expires_at}`.
    pub async fn archive(
        &self,
        credential: &str,
        id: DocumentId,
        policy: RetentionPolicy,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let user = self
            .security
            .admit(credential, &[Permission::Archive])
            .await?;

        let existing = self.adapters.relational.get(id).await.map_err(CoordinatorError::from)?;
        self.security
            .check_owner(&user, &existing.owner_id)
            .map_err(|e| CoordinatorError::Forbidden(e.to_string()))?;

        let mut context = HashMap::new();
        context.insert("document_id".to_string(), id.to_string().into());

        let outcome = self
            .with_id_lock(id, "archive", || async {
                let saga = self.saga_coordinator.run(SagaKind::ArchiveDocument, context).await;
                saga_to_result(saga, id)
            })
            .await;

        self.cache.invalidate(&document_key(id));
        match outcome {
            Ok(_) => {
                let record = self.archive_manager.archive(id, policy);
                self.security.audit(&user, "archive", Some(id), "ok", None);
                Ok(record.expires_at)
            }
            Err(err) => {
                self.security.audit(&user, "archive", Some(id), "error", Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// `restore(id) -> Ok | NotArchived`.
    pub async fn restore(&self, credential: &str, id: DocumentId) -> Result<()> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Write))
            .await?;

        let existing = self.adapters.relational.get(id).await.map_err(CoordinatorError::from)?;
        self.security
            .check_owner(&user, &existing.owner_id)
            .map_err(|e| CoordinatorError::Forbidden(e.to_string()))?;

        let mut context = HashMap::new();
        context.insert("document_id".to_string(), id.to_string().into());

        let outcome = self
            .with_id_lock(id, "restore", || async {
                let saga = self.saga_coordinator.run(SagaKind::RestoreDocument, context).await;
                saga_to_result(saga, id)
            })
            .await;

        self.cache.invalidate(&document_key(id));
        match outcome {
            Ok(_) => {
                self.archive_manager
                    .restore(id)
                    .map_err(|_| CoordinatorError::ValidationFailed("document is not archived".to_string()))?;
                self.security.audit(&user, "restore", Some(id), "ok", None);
                Ok(())
            }
            Err(err) => {
                self.security.audit(&user, "restore", Some(id), "error", Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// `batch_get(ids, timeout) -> map<id, Document>` (partial permitted).
    pub async fn batch_get(
        &self,
        credential: &str,
        ids: &[DocumentId],
        timeout: Duration,
    ) -> Result<HashMap<DocumentId, Document>> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Read))
            .await?;

        let result = self.batch_reader.get_all(ids, BackendSelection::all(), timeout).await;

        let relational = result.per_backend.get(&BackendKind::Relational).cloned().unwrap_or_default();
        let mut documents = HashMap::new();
        for (id, fragment) in relational {
            if fragment.owner_id != user.user_id && !user.has(Permission::ReadAll) {
                continue;
            }
            let document = self.assemble_document(&fragment).await;
            if !document.is_deleted() {
                documents.insert(id, document);
            }
        }

        self.security.audit(&user, "batch_get", None, "ok", None);
        Ok(documents)
    }

    /// `warmup(ids[])`: bulk prefetch through the coordinator, populating
    /// the cache the same way a `get()` miss would, minus the round trip
    /// back to the caller. Ids the caller doesn't own (without `ReadAll`),
    /// or that don't resolve to a live document, are silently skipped.
    /// Returns the number of documents actually warmed.
    pub async fn warmup(&self, credential: &str, ids: &[DocumentId]) -> Result<usize> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Read))
            .await?;

        let result = self
            .batch_reader
            .get_all(ids, BackendSelection::all(), self.config.batch.default_timeout)
            .await;

        let relational = result.per_backend.get(&BackendKind::Relational).cloned().unwrap_or_default();
        let mut warmed = 0;
        for (id, fragment) in relational {
            if fragment.owner_id != user.user_id && !user.has(Permission::ReadAll) {
                continue;
            }
            let document = self.assemble_document(&fragment).await;
            if document.is_deleted() || document.is_archived() {
                continue;
            }
            self.cache.put(document_key(id), document, None);
            warmed += 1;
        }

        self.security.audit(&user, "warmup", None, "ok", None);
        Ok(warmed)
    }

    /// `search(query: {vector?, graph?, relational?, join}) -> PolyglotResult`.
    ///
    /// Every caller-supplied `NativeFilter` is scoped with
    /// `(owner_id = caller) OR has(ReadAll)` before it reaches a backend —
    /// the caller never gets to hand an adapter an unscoped filter.
    pub async fn search(
        &self,
        credential: &str,
        filters: HashMap<BackendKind, NativeFilter>,
        join: JoinKind,
    ) -> Result<PolyglotResult> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Read))
            .await?;

        let backends: Vec<Arc<dyn QueryableBackend>> = filters
            .keys()
            .map(|kind| -> Arc<dyn QueryableBackend> {
                match kind {
                    BackendKind::Relational => self.adapters.relational.clone(),
                    BackendKind::Document => self.adapters.document.clone(),
                    BackendKind::Vector => self.adapters.vector.clone(),
                    BackendKind::Graph => self.adapters.graph.clone(),
                }
            })
            .collect();

        let has_read_all = user.has(Permission::ReadAll);
        let filters: HashMap<BackendKind, NativeFilter> = filters
            .into_iter()
            .map(|(kind, filter)| (kind, crate::query::scope_filter(filter, &user.user_id, has_read_all)))
            .collect();

        let planner = PolyglotPlanner::new(backends);
        let result = planner.execute(filters, join).await?;

        self.security.audit(&user, "search", None, "ok", None);
        Ok(result)
    }

    /// `stream_upload.begin`.
    pub fn stream_upload_begin(&self, size_hint: Option<u64>, metadata: Value) -> (UploadId, usize) {
        self.streaming.begin(size_hint, metadata)
    }

    /// `stream_upload.append`.
    pub fn stream_upload_append(
        &self,
        upload_id: UploadId,
        chunk_index: u64,
        bytes: Vec<u8>,
        checksum: u64,
    ) -> Result<AppendOutcome> {
        self.streaming
            .append(upload_id, chunk_index, bytes, checksum)
            .map_err(|e| CoordinatorError::ValidationFailed(e.to_string()))
    }

    /// `stream_upload.finish` — drives the `StreamUpload` saga so
    /// aborting it later removes partial data (spec.md §4.7).
    pub async fn stream_upload_finish(
        &self,
        credential: &str,
        upload_id: UploadId,
        total_checksum: u64,
        document_id: DocumentId,
        owner_id: &str,
    ) -> Result<()> {
        let user = self
            .security
            .admit(credential, &crate::security::required_permissions(Access::Write))
            .await?;

        let (_, bytes) = self
            .streaming
            .finish(upload_id, total_checksum)
            .map_err(|e| CoordinatorError::ValidationFailed(e.to_string()))?;

        let mut context = HashMap::new();
        context.insert("document_id".to_string(), document_id.to_string().into());
        context.insert("owner_id".to_string(), owner_id.into());
        context.insert("assembled_blob".to_string(), serde_json::to_value(bytes).unwrap());

        let saga = self.saga_coordinator.run(SagaKind::StreamUpload, context).await;
        let result = saga_to_result(saga, document_id);
        self.security.audit(&user, "stream_upload.finish", Some(document_id), "ok", None);
        result.map(|_| ())
    }

    /// `stream_upload.abort`.
    pub fn stream_upload_abort(&self, upload_id: UploadId) {
        self.streaming.abort(upload_id);
    }

    /// `stream_upload.progress`.
    pub fn stream_upload_progress(&self, upload_id: UploadId) -> Result<UploadProgress> {
        self.streaming
            .progress(upload_id)
            .map_err(|e| CoordinatorError::ValidationFailed(e.to_string()))
    }

    /// `stats()`.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// `health()`.
    pub async fn health(&self) -> HashMap<BackendKind, Health> {
        let mut health = HashMap::new();
        health.insert(BackendKind::Relational, self.adapters.relational.health().await);
        health.insert(BackendKind::Document, self.adapters.document.health().await);
        health.insert(BackendKind::Vector, self.adapters.vector.health().await);
        health.insert(BackendKind::Graph, self.adapters.graph.health().await);
        health
    }

    /// Crash-recovery sweep (spec.md §4.6.4): resumes every
    /// `Running`/`Compensating` saga left behind by a process that died
    /// mid-flight. Call once at startup before serving traffic.
    pub async fn recover(&self) -> Vec<crate::saga::SagaId> {
        self.saga_coordinator.recover_all().await
    }

    /// Background retention sweep (spec.md §4.8): issues
    /// `DeleteDocument(HARD)` sagas for every expired, non-permanent
    /// archive record.
    pub async fn sweep_archive(&self, credential: &str) -> usize {
        let expired = self.archive_manager.sweep();
        let mut swept = 0;
        for id in expired {
            if self.delete(credential, id, DeleteMode::Hard).await.is_ok() {
                self.archive_manager.remove(id);
                swept += 1;
            }
        }
        swept
    }

    async fn assemble_document(&self, fragment: &crate::model::DocumentFragment) -> Document {
        use crate::model::{BlobRef, EmbeddingRef, FragmentPayload, GraphNodeRef};

        let attributes = match &fragment.payload {
            FragmentPayload::Relational { attributes } => attributes.clone(),
            _ => HashMap::new(),
        };

        let created_at = attributes
            .get("_created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let updated_at = attributes
            .get("_updated_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or(created_at);

        let content_blob_ref = match self.adapters.document.get_blob(fragment.id).await {
            Ok(bytes) => Some(BlobRef {
                id: fragment.id,
                size: bytes.len() as u64,
                checksum: format!("{:x}", blob_checksum(&bytes)),
            }),
            Err(_) => None,
        };
        let embedding_ref = match self.adapters.vector.get(fragment.id).await {
            Ok(crate::model::DocumentFragment {
                payload: FragmentPayload::Vector { vector, .. },
                ..
            }) => Some(EmbeddingRef { id: fragment.id, dims: vector.len() }),
            _ => None,
        };
        let graph_node_ref = match self.adapters.graph.get(fragment.id).await {
            Ok(crate::model::DocumentFragment {
                payload: FragmentPayload::Graph { labels, .. },
                ..
            }) => Some(GraphNodeRef { id: fragment.id, labels }),
            _ => None,
        };

        let archived_at = self.archive_manager.get(fragment.id).map(|r| r.archived_at);

        Document {
            id: fragment.id,
            owner_id: fragment.owner_id.clone(),
            created_at,
            updated_at,
            deleted_at: fragment.deleted_at,
            archived_at,
            schema_version: fragment.version,
            attributes,
            content_blob_ref,
            embedding_ref,
            graph_node_ref,
        }
    }
}

fn build_write_context(id: DocumentId, owner_id: &str, input: &DocumentInput) -> HashMap<String, Value> {
    let mut context = HashMap::new();
    context.insert("document_id".to_string(), id.to_string().into());
    context.insert("owner_id".to_string(), owner_id.into());

    let mut attributes = input.attributes.clone();
    attributes.insert("_updated_at".to_string(), chrono::Utc::now().to_rfc3339().into());
    attributes
        .entry("_created_at".to_string())
        .or_insert_with(|| chrono::Utc::now().to_rfc3339().into());
    context.insert("attributes".to_string(), Value::Object(attributes.into_iter().collect()));

    if let Some(blob) = &input.blob {
        context.insert("blob".to_string(), serde_json::to_value(blob).unwrap());
    }
    if let Some(embedding) = &input.embedding {
        context.insert("embedding".to_string(), serde_json::to_value(embedding).unwrap());
    }
    if let Some(labels) = &input.graph_labels {
        context.insert("graph_labels".to_string(), serde_json::to_value(labels).unwrap());
    }
    context
}

fn saga_to_result(saga: crate::saga::Saga, id: DocumentId) -> Result<()> {
    use crate::saga::SagaState;
    match saga.state {
        SagaState::Committed => Ok(()),
        SagaState::Aborted => Err(CoordinatorError::ValidationFailed(
            saga.last_error.unwrap_or_else(|| "saga aborted".to_string()),
        )),
        SagaState::Orphaned => Err(CoordinatorError::Orphaned(saga.saga_id)),
        other => Err(CoordinatorError::internal(format!(
            "saga for {id} ended in unexpected state {other:?}"
        ))),
    }
}

fn blob_checksum(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RelationalFilterBuilder;
    use crate::saga::InMemorySagaStore;
    use crate::security::{ChannelAuditSink, Role, StaticAuthProvider, User};

    fn alice() -> User {
        User {
            user_id: "alice".to_string(),
            role: Role::User,
            permissions: [
                Permission::Read,
                Permission::Write,
                Permission::Delete,
                Permission::Archive,
            ]
            .into_iter()
            .collect(),
        }
    }

    fn bob() -> User {
        User {
            user_id: "bob".to_string(),
            role: Role::User,
            permissions: [Permission::Read, Permission::Write].into_iter().collect(),
        }
    }

    fn api() -> CoordinatorAPI {
        let auth = Arc::new(
            StaticAuthProvider::new()
                .register("tok-alice", alice())
                .register("tok-bob", bob()),
        );
        let audit: Arc<dyn AuditSink> = Arc::new(ChannelAuditSink::new(64));
        let saga_store: Arc<dyn SagaStore> = Arc::new(InMemorySagaStore::new());
        let api = CoordinatorAPI::new(auth, audit, saga_store, CoordinatorConfig::default());
        api.start();
        api
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let api = api();
        let mut attributes = HashMap::new();
        attributes.insert("title".to_string(), "hello".into());
        let id = api
            .create("tok-alice", DocumentInput { attributes, ..Default::default() })
            .await
            .unwrap();

        let doc = api.get("tok-alice", id, false).await.unwrap();
        assert_eq!(doc.owner_id, "alice");
        assert_eq!(doc.attributes["title"], Value::from("hello"));
    }

    #[tokio::test]
    async fn soft_deleted_document_is_not_found() {
        let api = api();
        let id = api.create("tok-alice", DocumentInput::default()).await.unwrap();
        api.delete("tok-alice", id, DeleteMode::Soft).await.unwrap();
        let err = api.get("tok-alice", id, false).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    /// A second saga on the same id fails fast rather than blocking,
    /// under the default `IdLockMode::FailFast`. Holding `id_locks`
    /// directly makes the contention deterministic instead of racing
    /// two real sagas against the scheduler.
    #[tokio::test]
    async fn concurrent_saga_same_id_fails_fast_when_locked() {
        let api = api();
        let id = api.create("tok-alice", DocumentInput::default()).await.unwrap();

        let lock = api.id_locks.lock_for(id);
        let _held = lock.try_lock().unwrap();

        let mut attributes = HashMap::new();
        attributes.insert("title".to_string(), "changed".into());
        let err = api
            .update("tok-alice", id, DocumentInput { attributes, ..Default::default() }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Busy(busy_id) if busy_id == id));
    }

    /// An unscoped filter handed to `search` by a caller without
    /// `ReadAll` must still only surface that caller's own documents.
    #[tokio::test]
    async fn search_without_read_all_is_scoped_to_owner() {
        let api = api();
        api.create("tok-alice", DocumentInput::default()).await.unwrap();
        let bob_id = api.create("tok-bob", DocumentInput::default()).await.unwrap();

        let mut filters = HashMap::new();
        filters.insert(
            BackendKind::Relational,
            NativeFilter::Relational(RelationalFilterBuilder::new().to_native()),
        );

        let result = api.search("tok-bob", filters, JoinKind::Intersection).await.unwrap();
        assert_eq!(result.ids, vec![bob_id], "bob must not see alice's document");
    }

    #[tokio::test]
    async fn warmup_populates_cache_for_owned_ids_only() {
        let api = api();
        let alice_id = api.create("tok-alice", DocumentInput::default()).await.unwrap();
        let bob_id = api.create("tok-bob", DocumentInput::default()).await.unwrap();

        let warmed = api
            .warmup("tok-alice", &[alice_id, bob_id])
            .await
            .unwrap();
        assert_eq!(warmed, 1, "alice should only warm her own document");
        assert_eq!(api.cache.stats().size, 1);
    }

    /// The audit drain loop only runs after an explicit `start()` — no
    /// background task is spun up by construction alone.
    #[tokio::test]
    async fn start_enables_audit_drain_loop() {
        let auth = Arc::new(StaticAuthProvider::new().register("tok-alice", alice()));
        let sink = Arc::new(ChannelAuditSink::new(64));
        let audit: Arc<dyn AuditSink> = sink.clone() as Arc<dyn AuditSink>;
        let saga_store: Arc<dyn SagaStore> = Arc::new(InMemorySagaStore::new());
        let api = CoordinatorAPI::new(auth, audit, saga_store, CoordinatorConfig::default());

        api.create("tok-alice", DocumentInput::default()).await.unwrap();
        tokio::task::yield_now().await;
        assert!(sink.drained_records().await.is_empty(), "no drain before start()");

        api.start();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!sink.drained_records().await.is_empty(), "drains once started");
    }
}
