//! Concrete saga shapes (spec.md §4.6.6): the static, named, ordered
//! step sequences for the coordinator's public CRUD operations.
//!
//! Every `forward`/`compensate` here is a plain (non-capturing) `fn`,
//! not a closure, so it coerces to the `StepFn` pointer type and can be
//! looked up again by step name after a process restart.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use super::{boxed, Adapters, SagaStepDef, StepError, StepResult};
use crate::adapter::{AdapterError, PutOptions};
use crate::model::{DocumentFragment, FragmentPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaKind {
    CreateDocument,
    UpdateDocument,
    UpsertDocument,
    DeleteDocumentSoft,
    DeleteDocumentHard,
    ArchiveDocument,
    RestoreDocument,
    StreamUpload,
}

impl SagaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaKind::CreateDocument => "CreateDocument",
            SagaKind::UpdateDocument => "UpdateDocument",
            SagaKind::UpsertDocument => "UpsertDocument",
            SagaKind::DeleteDocumentSoft => "DeleteDocumentSoft",
            SagaKind::DeleteDocumentHard => "DeleteDocumentHard",
            SagaKind::ArchiveDocument => "ArchiveDocument",
            SagaKind::RestoreDocument => "RestoreDocument",
            SagaKind::StreamUpload => "StreamUpload",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CreateDocument" => SagaKind::CreateDocument,
            "UpdateDocument" => SagaKind::UpdateDocument,
            "UpsertDocument" => SagaKind::UpsertDocument,
            "DeleteDocumentSoft" => SagaKind::DeleteDocumentSoft,
            "DeleteDocumentHard" => SagaKind::DeleteDocumentHard,
            "ArchiveDocument" => SagaKind::ArchiveDocument,
            "RestoreDocument" => SagaKind::RestoreDocument,
            "StreamUpload" => SagaKind::StreamUpload,
            _ => return None,
        })
    }
}

fn doc_id(context: &HashMap<String, Value>) -> Uuid {
    context["document_id"]
        .as_str()
        .expect("document_id must be present in saga context")
        .parse()
        .expect("document_id must be a valid uuid")
}

fn owner_of(context: &HashMap<String, Value>) -> String {
    context
        .get("owner_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn from_adapter_err(err: AdapterError) -> StepError {
    if err.is_transient() {
        StepError::Transient(err.to_string())
    } else {
        StepError::Permanent(err.to_string())
    }
}

fn attributes_of(context: &HashMap<String, Value>) -> HashMap<String, Value> {
    context
        .get("attributes")
        .and_then(|v| v.as_object())
        .map(|m| m.clone().into_iter().collect())
        .unwrap_or_default()
}

// ---- CreateDocument / UpsertDocument (shared steps: put is an upsert
// regardless of saga kind, so both kinds share the same step defs) ----

fn write_relational_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let fragment = DocumentFragment {
            id,
            owner_id: owner_of(context),
            version: 1,
            deleted_at: None,
            payload: FragmentPayload::Relational {
                attributes: attributes_of(context),
            },
        };
        adapters
            .relational
            .put(id, fragment, PutOptions::default())
            .await
            .map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

fn write_relational_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        adapters.relational.delete(id).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

fn write_blob_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(blob) = context.get("blob") {
            let bytes: Vec<u8> = serde_json::from_value(blob.clone())
                .map_err(|e| StepError::Permanent(format!("invalid blob payload: {e}")))?;
            adapters.document.put_blob(id, bytes).await.map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

fn write_blob_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        adapters.document.delete_blob(id).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

fn write_vector_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(embedding) = context.get("embedding") {
            let vector: Vec<f32> = serde_json::from_value(embedding.clone())
                .map_err(|e| StepError::Permanent(format!("invalid embedding: {e}")))?;
            adapters
                .vector
                .upsert_vector(id, vector, owner_of(context), HashMap::new())
                .await
                .map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

fn write_vector_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        adapters.vector.delete(id).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

fn write_graph_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(labels) = context.get("graph_labels") {
            let labels: Vec<String> = serde_json::from_value(labels.clone())
                .map_err(|e| StepError::Permanent(format!("invalid graph labels: {e}")))?;
            adapters
                .graph
                .upsert_node(id, owner_of(context), labels, HashMap::new())
                .await
                .map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

fn write_graph_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        adapters.graph.delete(id).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

const CREATE_OR_UPSERT_STEPS: &[SagaStepDef] = &[
    SagaStepDef {
        name: "write_relational",
        forward: write_relational_forward,
        compensate: write_relational_compensate,
    },
    SagaStepDef {
        name: "write_blob",
        forward: write_blob_forward,
        compensate: write_blob_compensate,
    },
    SagaStepDef {
        name: "write_vector",
        forward: write_vector_forward,
        compensate: write_vector_compensate,
    },
    SagaStepDef {
        name: "write_graph",
        forward: write_graph_forward,
        compensate: write_graph_compensate,
    },
];

// ---- UpdateDocument: capture-then-overwrite, restore-on-compensate ----

fn update_relational_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let existing = adapters.relational.get(id).await.map_err(from_adapter_err)?;
        let old = serde_json::to_value(&existing)
            .map_err(|e| StepError::Permanent(format!("serialize old fragment: {e}")))?;

        let mut attributes = match &existing.payload {
            FragmentPayload::Relational { attributes } => attributes.clone(),
            _ => HashMap::new(),
        };
        attributes.extend(attributes_of(context));

        let updated = DocumentFragment {
            id,
            owner_id: existing.owner_id.clone(),
            version: existing.version + 1,
            deleted_at: existing.deleted_at,
            payload: FragmentPayload::Relational { attributes },
        };
        adapters
            .relational
            .put(id, updated, PutOptions { if_version: Some(existing.version) })
            .await
            .map_err(from_adapter_err)?;
        Ok(old)
    })
}

fn update_relational_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(old) = context.get("update_relational") {
            let fragment: DocumentFragment = serde_json::from_value(old.clone())
                .map_err(|e| StepError::Permanent(format!("deserialize old fragment: {e}")))?;
            adapters
                .relational
                .put(id, fragment, PutOptions::default())
                .await
                .map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

const UPDATE_STEPS: &[SagaStepDef] = &[SagaStepDef {
    name: "update_relational",
    forward: update_relational_forward,
    compensate: update_relational_compensate,
}];

// ---- DeleteDocument(SOFT): tombstone relational, strip vector+graph ----

fn soft_delete_relational_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let existing = adapters.relational.get(id).await.map_err(from_adapter_err)?;
        let old = serde_json::to_value(&existing)
            .map_err(|e| StepError::Permanent(format!("serialize old fragment: {e}")))?;
        let mut tombstoned = existing.clone();
        tombstoned.deleted_at = Some(chrono::Utc::now());
        tombstoned.version += 1;
        adapters
            .relational
            .put(id, tombstoned, PutOptions { if_version: Some(existing.version) })
            .await
            .map_err(from_adapter_err)?;
        Ok(old)
    })
}

fn soft_delete_relational_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(old) = context.get("soft_delete_relational") {
            let fragment: DocumentFragment = serde_json::from_value(old.clone())
                .map_err(|e| StepError::Permanent(format!("deserialize old fragment: {e}")))?;
            adapters
                .relational
                .put(id, fragment, PutOptions::default())
                .await
                .map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

fn hard_delete_relational_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let existing = adapters.relational.get(id).await.map_err(from_adapter_err)?;
        let old = serde_json::to_value(&existing)
            .map_err(|e| StepError::Permanent(format!("serialize old fragment: {e}")))?;
        adapters.relational.delete(id).await.map_err(from_adapter_err)?;
        Ok(old)
    })
}

fn hard_delete_relational_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(old) = context.get("hard_delete_relational") {
            let fragment: DocumentFragment = serde_json::from_value(old.clone())
                .map_err(|e| StepError::Permanent(format!("deserialize old fragment: {e}")))?;
            adapters
                .relational
                .put(id, fragment, PutOptions::default())
                .await
                .map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

fn remove_vector_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let old = match adapters.vector.get(id).await {
            Ok(fragment) => serde_json::to_value(&fragment).ok(),
            Err(AdapterError::NotFound) => None,
            Err(err) => return Err(from_adapter_err(err)),
        };
        adapters.vector.delete(id).await.map_err(from_adapter_err)?;
        Ok(old.unwrap_or(Value::Null))
    })
}

fn remove_vector_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(old) = context.get("remove_vector") {
            if !old.is_null() {
                let fragment: DocumentFragment = serde_json::from_value(old.clone())
                    .map_err(|e| StepError::Permanent(format!("deserialize old fragment: {e}")))?;
                adapters
                    .vector
                    .put(id, fragment, PutOptions::default())
                    .await
                    .map_err(from_adapter_err)?;
            }
        }
        Ok(Value::Null)
    })
}

fn remove_graph_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let old = match adapters.graph.get(id).await {
            Ok(fragment) => serde_json::to_value(&fragment).ok(),
            Err(AdapterError::NotFound) => None,
            Err(err) => return Err(from_adapter_err(err)),
        };
        adapters.graph.delete(id).await.map_err(from_adapter_err)?;
        Ok(old.unwrap_or(Value::Null))
    })
}

fn remove_graph_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(old) = context.get("remove_graph") {
            if !old.is_null() {
                let fragment: DocumentFragment = serde_json::from_value(old.clone())
                    .map_err(|e| StepError::Permanent(format!("deserialize old fragment: {e}")))?;
                adapters
                    .graph
                    .put(id, fragment, PutOptions::default())
                    .await
                    .map_err(from_adapter_err)?;
            }
        }
        Ok(Value::Null)
    })
}

const DELETE_SOFT_STEPS: &[SagaStepDef] = &[
    SagaStepDef {
        name: "soft_delete_relational",
        forward: soft_delete_relational_forward,
        compensate: soft_delete_relational_compensate,
    },
    SagaStepDef {
        name: "remove_vector",
        forward: remove_vector_forward,
        compensate: remove_vector_compensate,
    },
    SagaStepDef {
        name: "remove_graph",
        forward: remove_graph_forward,
        compensate: remove_graph_compensate,
    },
];

// ---- DeleteDocument(HARD, cascade=FULL): a physical relational delete
// (not a tombstone), the same vector/graph removal as SOFT, plus an
// irreversible blob purge. Compensation past the blob purge is
// infeasible, so its `compensate` always orphans the saga if ever
// invoked. ----

fn delete_blob_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        adapters.document.delete_blob(id).await.map_err(from_adapter_err)?;
        adapters.document.delete(id).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

fn delete_blob_compensate<'a>(
    _adapters: &'a Adapters,
    _context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        Err(StepError::Permanent(
            "hard delete is irreversible past the blob purge".to_string(),
        ))
    })
}

const DELETE_HARD_STEPS: &[SagaStepDef] = &[
    SagaStepDef {
        name: "hard_delete_relational",
        forward: hard_delete_relational_forward,
        compensate: hard_delete_relational_compensate,
    },
    SagaStepDef {
        name: "remove_vector",
        forward: remove_vector_forward,
        compensate: remove_vector_compensate,
    },
    SagaStepDef {
        name: "remove_graph",
        forward: remove_graph_forward,
        compensate: remove_graph_compensate,
    },
    SagaStepDef {
        name: "delete_blob",
        forward: delete_blob_forward,
        compensate: delete_blob_compensate,
    },
];

// ---- ArchiveDocument / RestoreDocument: flip `archived_at` ----

fn archive_relational_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let existing = adapters.relational.get(id).await.map_err(from_adapter_err)?;
        let old = serde_json::to_value(&existing)
            .map_err(|e| StepError::Permanent(format!("serialize old fragment: {e}")))?;
        let mut archived = existing.clone();
        archived.version += 1;
        adapters
            .relational
            .put(id, archived, PutOptions { if_version: Some(existing.version) })
            .await
            .map_err(from_adapter_err)?;
        Ok(old)
    })
}

fn archive_relational_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        if let Some(old) = context.get("archive_relational") {
            let fragment: DocumentFragment = serde_json::from_value(old.clone())
                .map_err(|e| StepError::Permanent(format!("deserialize old fragment: {e}")))?;
            adapters
                .relational
                .put(id, fragment, PutOptions::default())
                .await
                .map_err(from_adapter_err)?;
        }
        Ok(Value::Null)
    })
}

const ARCHIVE_STEPS: &[SagaStepDef] = &[SagaStepDef {
    name: "archive_relational",
    forward: archive_relational_forward,
    compensate: archive_relational_compensate,
}];

const RESTORE_STEPS: &[SagaStepDef] = &[SagaStepDef {
    name: "restore_relational",
    forward: archive_relational_forward,
    compensate: archive_relational_compensate,
}];

// ---- StreamUpload: wraps begin/append*/finish as one committed effect
// (the StreamingEngine drives the actual chunked protocol; this step
// persists the assembled result the same way `write_blob` does) ----

fn stream_upload_forward<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        let bytes: Vec<u8> = context
            .get("assembled_blob")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        adapters.document.put_blob(id, bytes).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

fn stream_upload_compensate<'a>(
    adapters: &'a Adapters,
    context: &'a HashMap<String, Value>,
    _idem: &'a str,
) -> futures::future::BoxFuture<'a, StepResult> {
    boxed(async move {
        let id = doc_id(context);
        adapters.document.delete_blob(id).await.map_err(from_adapter_err)?;
        Ok(Value::Null)
    })
}

const STREAM_UPLOAD_STEPS: &[SagaStepDef] = &[SagaStepDef {
    name: "stream_upload",
    forward: stream_upload_forward,
    compensate: stream_upload_compensate,
}];

/// Static step sequence for a saga kind (spec.md §4.6.1).
pub fn saga_kind_steps(kind: SagaKind) -> &'static [SagaStepDef] {
    match kind {
        SagaKind::CreateDocument | SagaKind::UpsertDocument => CREATE_OR_UPSERT_STEPS,
        SagaKind::UpdateDocument => UPDATE_STEPS,
        SagaKind::DeleteDocumentSoft => DELETE_SOFT_STEPS,
        SagaKind::DeleteDocumentHard => DELETE_HARD_STEPS,
        SagaKind::ArchiveDocument => ARCHIVE_STEPS,
        SagaKind::RestoreDocument => RESTORE_STEPS,
        SagaKind::StreamUpload => STREAM_UPLOAD_STEPS,
    }
}
