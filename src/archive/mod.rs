//! `ArchiveManager` (spec.md §4.8, C8): moves documents to long-term
//! state with a retention deadline and sweeps expired ones into a
//! `DeleteDocument(HARD)` saga.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;

use crate::model::{ArchiveRecord, DocumentId, RetentionPolicy};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("document {0} is not archived")]
    NotArchived(DocumentId),
}

/// In-memory archive index: `id -> {archived_at, expires_at, policy}`
/// (spec.md §6.3). A real deployment backs this with a relational
/// table the same way the saga store backs sagas.
pub struct ArchiveManager {
    records: Mutex<HashMap<DocumentId, ArchiveRecord>>,
}

impl Default for ArchiveManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveManager {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// `archive(id, retention_policy) -> archive_record`.
    pub fn archive(&self, id: DocumentId, policy: RetentionPolicy) -> ArchiveRecord {
        let archived_at = Utc::now();
        let expires_at = policy.duration().map(|d| archived_at + d);
        let record = ArchiveRecord {
            id,
            archived_at,
            expires_at,
            policy,
        };
        self.records.lock().unwrap().insert(id, record.clone());
        record
    }

    /// `restore(id) -> ok | NotArchived`.
    pub fn restore(&self, id: DocumentId) -> Result<(), ArchiveError> {
        self.records
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(ArchiveError::NotArchived(id))
    }

    /// Looks up a single record without affecting the index.
    pub fn get(&self, id: DocumentId) -> Option<ArchiveRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    /// `list_archived(filter)`: the full index, newest first. Backend
    /// query translation lives in C5; this layer is a plain in-memory
    /// scan, consistent with the scope of the mock adapters.
    pub fn list_archived(&self) -> Vec<ArchiveRecord> {
        let mut records: Vec<ArchiveRecord> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        records
    }

    /// `sweep()`: ids whose retention has expired, exempting `Permanent`
    /// policy records. Returns the ids so the caller can issue
    /// `DeleteDocument(HARD)` sagas for each (spec.md §4.8).
    pub fn sweep(&self) -> Vec<DocumentId> {
        let now = Utc::now();
        let records = self.records.lock().unwrap();
        records
            .values()
            .filter(|r| !r.policy.is_permanent())
            .filter(|r| r.expires_at.map(|exp| exp < now).unwrap_or(false))
            .map(|r| r.id)
            .collect()
    }

    /// Removes swept records from the index once their hard-delete
    /// sagas have committed.
    pub fn remove(&self, id: DocumentId) {
        self.records.lock().unwrap().remove(&id);
    }
}
