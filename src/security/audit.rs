//! `AuditSink` contract plus the ambient `ChannelAuditSink` (spec.md
//! §4.3 step 5, §6.2, §6.3). Audit persistence itself is out of scope
//! (spec.md §1); this is the non-blocking, bounded-buffer collaborator
//! every deployment still needs to exercise the back-pressure contract.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::Role;
use crate::saga::SagaId;

/// One audit line (spec.md §6.3).
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub role: Role,
    pub op: String,
    pub resource_id: Option<Uuid>,
    pub outcome: String,
    pub error: Option<String>,
    pub saga_id: Option<SagaId>,
}

/// Sink for audit records. `emit` must never block the request path
/// (spec.md §4.3 step 5); overflow handling is the implementation's call.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: AuditRecord);

    /// Starts any background work the sink needs. Default is a no-op for
    /// purely synchronous sinks. `CoordinatorAPI::start()` calls this
    /// once; no sink does its own work before that.
    fn start(&self) {}

    /// Stops background work started by `start()`. Default is a no-op.
    fn stop(&self) {}
}

/// Bounded-channel `AuditSink` draining to an in-memory buffer, with a
/// drop-oldest overflow policy and a counter of dropped records
/// (spec.md §5's back-pressure rule: "bounded buffer; drop-oldest on
/// overflow with a counter").
///
/// The drain loop does not run until `start()` is called — constructing
/// a sink must never spin up background work on its own.
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditRecord>,
    rx: StdMutex<Option<mpsc::Receiver<AuditRecord>>>,
    drain_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
    drained: Arc<tokio::sync::Mutex<Vec<AuditRecord>>>,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: StdMutex::new(Some(rx)),
            drain_task: StdMutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
            drained: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn drained_records(&self) -> Vec<AuditRecord> {
        self.drained.lock().await.clone()
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, record: AuditRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("audit buffer full, dropping oldest-equivalent record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("audit sink receiver dropped");
            }
        }
    }

    fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        let mut rx = rx;
        let drained_writer = Arc::clone(&self.drained);
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                drained_writer.lock().await.push(record);
            }
        });
        *self.drain_task.lock().unwrap() = Some(handle);
    }

    fn stop(&self) {
        if let Some(handle) = self.drain_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
