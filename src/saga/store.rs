//! `SagaStore` contract (spec.md §6.2) plus an in-memory implementation
//! with lease-based recovery exclusivity (spec.md §4.6.4).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::{Saga, SagaId, SagaState};

#[derive(Debug, Error)]
pub enum SagaStoreError {
    #[error("saga {0} not found")]
    NotFound(SagaId),

    #[error("saga {0} is leased by another recovery worker")]
    LeaseHeld(SagaId),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type SagaStoreResult<T> = Result<T, SagaStoreError>;

/// Durable persistence for saga records (spec.md §6.2, §6.3). Real
/// deployments back this with a relational table; the in-memory
/// implementation here gives saga/coordinator tests a durable-enough
/// substitute, same posture as the mock `BackendAdapter`s in C1.
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn begin(&self, saga: Saga) -> SagaStoreResult<()>;
    async fn load(&self, id: SagaId) -> SagaStoreResult<Saga>;
    async fn save(&self, saga: &Saga) -> SagaStoreResult<()>;
    /// Sagas in `Running` or `Compensating` — recovery worker's scan set.
    async fn list_recoverable(&self) -> SagaStoreResult<Vec<SagaId>>;
    /// Acquire exclusive recovery access to a saga for `ttl`. Fails if
    /// already leased and unexpired (single-writer-per-saga, §4.6.4).
    async fn acquire_lease(&self, id: SagaId, ttl: std::time::Duration) -> SagaStoreResult<()>;
    async fn release_lease(&self, id: SagaId) -> SagaStoreResult<()>;
}

struct Lease {
    holder: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    sagas: HashMap<SagaId, Saga>,
    leases: HashMap<SagaId, Lease>,
}

pub struct InMemorySagaStore {
    state: Mutex<State>,
}

impl Default for InMemorySagaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn begin(&self, saga: Saga) -> SagaStoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.sagas.insert(saga.saga_id, saga);
        Ok(())
    }

    async fn load(&self, id: SagaId) -> SagaStoreResult<Saga> {
        self.state
            .lock()
            .unwrap()
            .sagas
            .get(&id)
            .cloned()
            .ok_or(SagaStoreError::NotFound(id))
    }

    async fn save(&self, saga: &Saga) -> SagaStoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.sagas.insert(saga.saga_id, saga.clone());
        Ok(())
    }

    async fn list_recoverable(&self) -> SagaStoreResult<Vec<SagaId>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sagas
            .values()
            .filter(|s| matches!(s.state, SagaState::Running | SagaState::Compensating))
            .map(|s| s.saga_id)
            .collect())
    }

    async fn acquire_lease(&self, id: SagaId, ttl: std::time::Duration) -> SagaStoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        if let Some(existing) = state.leases.get(&id) {
            if existing.expires_at > now {
                return Err(SagaStoreError::LeaseHeld(id));
            }
        }
        let expires_at = now
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(30));
        state.leases.insert(
            id,
            Lease {
                holder: Uuid::new_v4(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn release_lease(&self, id: SagaId) -> SagaStoreResult<()> {
        self.state.lock().unwrap().leases.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{Saga, SagaState};

    fn saga(id: SagaId, state: SagaState) -> Saga {
        Saga {
            saga_id: id,
            kind: "CreateDocument".to_string(),
            state,
            steps: vec![],
            cursor: 0,
            context: HashMap::new(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            last_error: None,
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn begin_then_load_round_trips() {
        let store = InMemorySagaStore::new();
        let id = Uuid::new_v4();
        store.begin(saga(id, SagaState::Running)).await.unwrap();
        let loaded = store.load(id).await.unwrap();
        assert_eq!(loaded.saga_id, id);
    }

    #[tokio::test]
    async fn list_recoverable_only_running_or_compensating() {
        let store = InMemorySagaStore::new();
        let running = Uuid::new_v4();
        let committed = Uuid::new_v4();
        store.begin(saga(running, SagaState::Running)).await.unwrap();
        store
            .begin(saga(committed, SagaState::Committed))
            .await
            .unwrap();

        let recoverable = store.list_recoverable().await.unwrap();
        assert!(recoverable.contains(&running));
        assert!(!recoverable.contains(&committed));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = InMemorySagaStore::new();
        let id = Uuid::new_v4();
        store
            .acquire_lease(id, std::time::Duration::from_secs(30))
            .await
            .unwrap();
        assert!(store
            .acquire_lease(id, std::time::Duration::from_secs(30))
            .await
            .is_err());
        store.release_lease(id).await.unwrap();
        assert!(store
            .acquire_lease(id, std::time::Duration::from_secs(30))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reacquired() {
        let store = InMemorySagaStore::new();
        let id = Uuid::new_v4();
        store
            .acquire_lease(id, std::time::Duration::from_millis(0))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store
            .acquire_lease(id, std::time::Duration::from_secs(30))
            .await
            .is_ok());
    }
}
