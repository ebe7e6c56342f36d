//! Core data model (spec.md §3).
//!
//! `Document` is the logical unit; `DocumentFragment` is its per-backend
//! projection. The coordinator holds no authoritative copy — the union
//! of fragments *is* the document.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit document identifier, minted by the coordinator.
pub type DocumentId = Uuid;

/// A caller-supplied value, stored verbatim in `attributes`.
pub type AttributeValue = serde_json::Value;

/// Logical document (spec.md §3).
///
/// Assembled by merging fragments from whichever backends hold a
/// projection of this id; never persisted as a single row anywhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub schema_version: u64,
    pub attributes: HashMap<String, AttributeValue>,
    pub content_blob_ref: Option<BlobRef>,
    pub embedding_ref: Option<EmbeddingRef>,
    pub graph_node_ref: Option<GraphNodeRef>,
}

impl Document {
    /// I4: archived documents are invisible to non-archive-aware reads.
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// I3: soft-deleted documents keep a relational/document tombstone
    /// but have no vector or graph fragment.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Reference to a blob held by the document backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobRef {
    pub id: DocumentId,
    pub size: u64,
    pub checksum: String,
}

/// Reference to an embedding held by the vector backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRef {
    pub id: DocumentId,
    pub dims: usize,
}

/// Reference to a node held by the graph backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphNodeRef {
    pub id: DocumentId,
    pub labels: Vec<String>,
}

/// One backend's projection of a document. At most one fragment per
/// backend per document id; the coordinator owns no authoritative copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentFragment {
    pub id: DocumentId,
    pub owner_id: String,
    pub version: u64,
    pub deleted_at: Option<DateTime<Utc>>,
    pub payload: FragmentPayload,
}

/// Backend-specific payload carried by a fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FragmentPayload {
    Relational {
        attributes: HashMap<String, AttributeValue>,
    },
    Document {
        blob: Vec<u8>,
        content_type: String,
    },
    Vector {
        vector: Vec<f32>,
        metadata: HashMap<String, AttributeValue>,
    },
    Graph {
        labels: Vec<String>,
        props: HashMap<String, AttributeValue>,
    },
}

/// Retention policy for archived documents (spec.md §4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetentionPolicy {
    Days(u32),
    Years(u32),
    Permanent,
}

impl RetentionPolicy {
    /// Fixed value objects named in spec.md §4.8.
    pub const THIRTY_DAYS: RetentionPolicy = RetentionPolicy::Days(30);
    pub const NINETY_DAYS: RetentionPolicy = RetentionPolicy::Days(90);
    pub const ONE_YEAR: RetentionPolicy = RetentionPolicy::Years(1);
    pub const THREE_YEARS: RetentionPolicy = RetentionPolicy::Years(3);
    pub const SEVEN_YEARS: RetentionPolicy = RetentionPolicy::Years(7);
    pub const TEN_YEARS: RetentionPolicy = RetentionPolicy::Years(10);

    /// `permanent` is exempt from sweep.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RetentionPolicy::Permanent)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            RetentionPolicy::Days(d) => Some(chrono::Duration::days(*d as i64)),
            RetentionPolicy::Years(y) => Some(chrono::Duration::days(*y as i64 * 365)),
            RetentionPolicy::Permanent => None,
        }
    }
}

/// Archive index entry (spec.md §6.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveRecord {
    pub id: DocumentId,
    pub archived_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub policy: RetentionPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_archived_and_deleted_flags() {
        let mut doc = sample_document();
        assert!(!doc.is_archived());
        assert!(!doc.is_deleted());

        doc.archived_at = Some(Utc::now());
        assert!(doc.is_archived());

        doc.deleted_at = Some(Utc::now());
        assert!(doc.is_deleted());
    }

    #[test]
    fn retention_policy_permanent_is_exempt() {
        assert!(RetentionPolicy::Permanent.is_permanent());
        assert!(RetentionPolicy::THIRTY_DAYS.duration().is_some());
        assert!(RetentionPolicy::Permanent.duration().is_none());
    }

    fn sample_document() -> Document {
        Document {
            id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            archived_at: None,
            schema_version: 1,
            attributes: HashMap::new(),
            content_blob_ref: None,
            embedding_ref: None,
            graph_node_ref: None,
        }
    }
}
