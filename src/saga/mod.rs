//! `SagaCoordinator` (spec.md §4.6, C6) — the hardest part.
//!
//! Forward steps and inverse compensations execute against a static,
//! named, ordered step sequence per saga kind. Step functions are
//! looked up by stable id rather than stored as closures so that a
//! saga record can be resumed by an entirely different process after a
//! crash (spec.md §4.6.1, §4.6.4).

pub mod kinds;
mod store;

pub use kinds::{saga_kind_steps, SagaKind};
pub use store::{InMemorySagaStore, SagaStore, SagaStoreError, SagaStoreResult};

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::adapter::{MockDocumentAdapter, MockGraphAdapter, MockRelationalAdapter, MockVectorAdapter};
use crate::utils::retry::RetryConfig;

pub type SagaId = Uuid;

/// `Saga.state` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Pending,
    Running,
    Compensating,
    Committed,
    Aborted,
    Orphaned,
}

/// `SagaStep.status` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
    Compensated,
}

/// A step's recorded progress within a saga record. `result` holds the
/// step's own output once succeeded, so compensation can read back
/// whatever forward captured (e.g. a prior fragment to restore).
#[derive(Debug, Clone)]
pub struct SagaStepRecord {
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub result: Option<Value>,
}

/// The durable saga record (spec.md §3).
#[derive(Debug, Clone)]
pub struct Saga {
    pub saga_id: SagaId,
    pub kind: String,
    pub state: SagaState,
    pub steps: Vec<SagaStepRecord>,
    pub cursor: usize,
    pub context: HashMap<String, Value>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_error: Option<String>,
    pub schema_version: u32,
}

impl Saga {
    pub fn new(kind: SagaKind, context: HashMap<String, Value>) -> Self {
        let now = chrono::Utc::now();
        let steps = saga_kind_steps(kind)
            .iter()
            .map(|def| SagaStepRecord {
                name: def.name.to_string(),
                status: StepStatus::NotStarted,
                attempts: 0,
                result: None,
            })
            .collect();
        Self {
            saga_id: Uuid::new_v4(),
            kind: kind.as_str().to_string(),
            state: SagaState::Pending,
            steps,
            cursor: 0,
            context,
            started_at: now,
            updated_at: now,
            last_error: None,
            schema_version: 1,
        }
    }

    /// Deterministic idempotency key for a step: re-derivable after a
    /// crash from saga identity alone (spec.md §4.6.1).
    pub fn idempotency_key(&self, step_name: &str) -> String {
        format!("{}:{}", self.saga_id, step_name)
    }
}

/// Outcome of a forward or compensate step invocation.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

pub type StepResult = Result<Value, StepError>;

/// The four backend adapters a step function may use. Bundled so step
/// function pointers have a single, stable-arity signature regardless
/// of which backend(s) they touch.
#[derive(Clone)]
pub struct Adapters {
    pub relational: Arc<MockRelationalAdapter>,
    pub document: Arc<MockDocumentAdapter>,
    pub vector: Arc<MockVectorAdapter>,
    pub graph: Arc<MockGraphAdapter>,
}

/// A step function: reads the saga's accumulated context (outputs of
/// earlier steps plus the saga's initial input) and the step's
/// idempotency key, and returns its own output or a typed failure.
/// Stored as a plain function pointer — never a closure — so it
/// survives process restart when looked up again by name.
pub type StepFn = for<'a> fn(
    &'a Adapters,
    &'a HashMap<String, Value>,
    &'a str,
) -> BoxFuture<'a, StepResult>;

#[derive(Clone, Copy)]
pub struct SagaStepDef {
    pub name: &'static str,
    pub forward: StepFn,
    pub compensate: StepFn,
}

/// Pins a step function's future the way `async fn` shorthand can't
/// when the function is stored as a bare pointer.
pub fn boxed<'a, F>(fut: F) -> Pin<Box<dyn std::future::Future<Output = StepResult> + Send + 'a>>
where
    F: std::future::Future<Output = StepResult> + Send + 'a,
{
    Box::pin(fut)
}

/// Per-saga-id exclusivity mode (spec.md §5, §6.4 `saga.id_lock_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdLockMode {
    Wait,
    FailFast,
}

#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub step_max_attempts: u32,
    pub backoff: RetryConfig,
    pub id_lock_mode: IdLockMode,
    pub recovery_scan_interval: Duration,
    pub lease_ttl: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_max_attempts: 5,
            backoff: RetryConfig::for_saga_steps(),
            id_lock_mode: IdLockMode::FailFast,
            recovery_scan_interval: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(60),
        }
    }
}

/// Drives forward execution, compensation, and crash recovery for
/// sagas against an injected `SagaStore` and the four adapters.
pub struct SagaCoordinator {
    store: Arc<dyn SagaStore>,
    adapters: Adapters,
    config: SagaConfig,
}

impl SagaCoordinator {
    pub fn new(store: Arc<dyn SagaStore>, adapters: Adapters, config: SagaConfig) -> Self {
        Self {
            store,
            adapters,
            config,
        }
    }

    /// Begin and drive a new saga of `kind` to completion (`Committed`
    /// or `Aborted`/`Orphaned`), per spec.md §4.6.2/§4.6.3.
    pub async fn run(&self, kind: SagaKind, context: HashMap<String, Value>) -> Saga {
        let mut saga = Saga::new(kind, context);
        saga.state = SagaState::Running;
        self.store.begin(saga.clone()).await.ok();
        self.drive(&mut saga, kind).await;
        saga
    }

    /// Resume an existing saga from its persisted cursor (spec.md §4.6.4).
    pub async fn resume(&self, saga_id: SagaId) -> Result<Saga, SagaStoreError> {
        let mut saga = self.store.load(saga_id).await?;
        let kind = SagaKind::parse(&saga.kind).expect("persisted saga kind must be known");
        self.drive(&mut saga, kind).await;
        Ok(saga)
    }

    async fn drive(&self, saga: &mut Saga, kind: SagaKind) {
        let defs = saga_kind_steps(kind);

        match saga.state {
            SagaState::Running => self.run_forward(saga, defs).await,
            SagaState::Compensating => self.run_compensation(saga, defs).await,
            _ => {}
        }
    }

    async fn run_forward(&self, saga: &mut Saga, defs: &[SagaStepDef]) {
        while saga.cursor < defs.len() {
            let def = defs[saga.cursor];
            saga.steps[saga.cursor].status = StepStatus::InProgress;
            self.persist(saga).await;

            let idempotency_key = saga.idempotency_key(def.name);
            let outcome = self.invoke_with_retry(def.forward, saga, &idempotency_key).await;

            match outcome {
                Ok(output) => {
                    saga.context.insert(def.name.to_string(), output.clone());
                    saga.steps[saga.cursor].status = StepStatus::Succeeded;
                    saga.steps[saga.cursor].result = Some(output);
                    saga.cursor += 1;
                    self.persist(saga).await;
                }
                Err(err) => {
                    tracing::error!(saga_id = %saga.saga_id, step = def.name, error = %err, "forward step failed permanently");
                    saga.steps[saga.cursor].status = StepStatus::Failed;
                    saga.last_error = Some(err.to_string());
                    saga.state = SagaState::Compensating;
                    self.persist(saga).await;
                    self.run_compensation(saga, defs).await;
                    return;
                }
            }
        }

        saga.state = SagaState::Committed;
        self.persist(saga).await;
        tracing::debug!(saga_id = %saga.saga_id, "saga committed");
    }

    async fn run_compensation(&self, saga: &mut Saga, defs: &[SagaStepDef]) {
        let succeeded: Vec<usize> = saga
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Succeeded)
            .map(|(i, _)| i)
            .collect();

        for idx in succeeded.into_iter().rev() {
            let def = defs[idx];
            let idempotency_key = saga.idempotency_key(def.name);
            let outcome = self.invoke_with_retry(def.compensate, saga, &idempotency_key).await;

            match outcome {
                Ok(_) => {
                    saga.steps[idx].status = StepStatus::Compensated;
                    self.persist(saga).await;
                }
                Err(err) => {
                    tracing::error!(saga_id = %saga.saga_id, step = def.name, error = %err, "compensation exhausted retries, orphaning saga");
                    saga.state = SagaState::Orphaned;
                    saga.last_error = Some(err.to_string());
                    self.persist(saga).await;
                    return;
                }
            }
        }

        saga.state = SagaState::Aborted;
        self.persist(saga).await;
        tracing::debug!(saga_id = %saga.saga_id, "saga aborted after compensation");
    }

    /// Exponential-backoff retry loop around a single step invocation.
    /// A `Transient` error is retried up to `step_max_attempts`; once
    /// exhausted it is treated as `Permanent` (spec.md §4.6.2d).
    async fn invoke_with_retry(&self, f: StepFn, saga: &Saga, idempotency_key: &str) -> StepResult {
        let mut attempt = 0;
        loop {
            match f(&self.adapters, &saga.context, idempotency_key).await {
                Ok(value) => return Ok(value),
                Err(StepError::Permanent(msg)) => return Err(StepError::Permanent(msg)),
                Err(StepError::Transient(msg)) => {
                    if attempt >= self.config.step_max_attempts {
                        return Err(StepError::Permanent(format!(
                            "exhausted {attempt} retries: {msg}"
                        )));
                    }
                    tracing::warn!(attempt, error = %msg, "transient step failure, retrying");
                    tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn persist(&self, saga: &Saga) {
        if let Err(err) = self.store.save(saga).await {
            tracing::error!(saga_id = %saga.saga_id, error = %err, "failed to persist saga record");
        }
    }

    /// Crash-recovery scan: resumes every `Running`/`Compensating` saga
    /// under a lease so only one worker drives it at a time (spec.md
    /// §4.6.4).
    pub async fn recover_all(&self) -> Vec<SagaId> {
        let mut recovered = Vec::new();
        let Ok(ids) = self.store.list_recoverable().await else {
            return recovered;
        };
        for id in ids {
            if self.store.acquire_lease(id, self.config.lease_ttl).await.is_err() {
                continue;
            }
            if self.resume(id).await.is_ok() {
                recovered.push(id);
            }
            self.store.release_lease(id).await.ok();
        }
        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::kinds::SagaKind;

    fn adapters() -> Adapters {
        Adapters {
            relational: Arc::new(MockRelationalAdapter::new()),
            document: Arc::new(MockDocumentAdapter::new()),
            vector: Arc::new(MockVectorAdapter::new()),
            graph: Arc::new(MockGraphAdapter::new()),
        }
    }

    fn coordinator() -> SagaCoordinator {
        SagaCoordinator::new(
            Arc::new(InMemorySagaStore::new()),
            adapters(),
            SagaConfig::default(),
        )
    }

    fn base_context(owner: &str) -> HashMap<String, Value> {
        let mut ctx = HashMap::new();
        ctx.insert("document_id".to_string(), Uuid::new_v4().to_string().into());
        ctx.insert("owner_id".to_string(), owner.into());
        ctx.insert("attributes".to_string(), serde_json::json!({"title": "A"}));
        ctx
    }

    #[tokio::test]
    async fn create_document_saga_commits_and_writes_fragments() {
        let coordinator = coordinator();
        let saga = coordinator
            .run(SagaKind::CreateDocument, base_context("alice"))
            .await;
        assert_eq!(saga.state, SagaState::Committed);

        let id: Uuid = saga.context["document_id"].as_str().unwrap().parse().unwrap();
        assert!(coordinator.adapters.relational.get(id).await.is_ok());
    }

    #[tokio::test]
    async fn create_document_saga_compensates_on_permanent_vector_failure() {
        let coordinator = coordinator();
        coordinator.adapters.vector.fail_next_put(crate::adapter::AdapterError::Permanent {
            backend: crate::adapter::BackendKind::Vector,
            cause: "disk full".to_string(),
        });

        let mut context = base_context("alice");
        context.insert("embedding".to_string(), serde_json::json!([0.1, 0.2]));

        let saga = coordinator.run(SagaKind::CreateDocument, context).await;
        assert_eq!(saga.state, SagaState::Aborted);

        let id: Uuid = saga.context["document_id"].as_str().unwrap().parse().unwrap();
        assert!(coordinator.adapters.relational.get(id).await.is_err());
    }
}
