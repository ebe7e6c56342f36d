//! `SecurityGate` (spec.md §4.3, C3): authenticate, authorize, inject
//! row-level predicates, rate-limit, audit. Wraps every public
//! `CoordinatorAPI` entry.

mod audit;
mod ratelimit;

pub use audit::{AuditRecord, AuditSink, ChannelAuditSink};
pub use ratelimit::{RateLimitConfig, RateLimiter};

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::query::ExprBuilder;

/// A caller's identity and grants, resolved by `AuthProvider` from a
/// credential. Never minted by the coordinator itself (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub role: Role,
    pub permissions: HashSet<Permission>,
}

impl User {
    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn has_all(&self, required: &[Permission]) -> bool {
        required.iter().all(|p| self.permissions.contains(p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    Admin,
    Service,
    User,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    /// Bypasses the row-level owner predicate on reads.
    ReadAll,
    Write,
    Delete,
    Archive,
    Admin,
}

/// Resolves an opaque credential (certificate fingerprint, bearer token)
/// into a `User` (spec.md §6.2).
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<User, SecurityError>;
}

/// A fixed-table `AuthProvider`, the shape test suites and small
/// deployments use instead of a real identity provider.
#[derive(Debug, Default)]
pub struct StaticAuthProvider {
    users: std::collections::HashMap<String, User>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, credential: impl Into<String>, user: User) -> Self {
        self.users.insert(credential.into(), user);
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn resolve(&self, credential: &str) -> Result<User, SecurityError> {
        self.users
            .get(credential)
            .cloned()
            .ok_or(SecurityError::Unauthenticated)
    }
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("caller could not be authenticated")]
    Unauthenticated,

    #[error("caller lacks required permission: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

/// `read` vs `write`/`delete` changes how the row-level predicate is
/// injected (spec.md §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Delete,
}

/// Composes authentication, authorization, row-level predicate
/// injection, rate limiting, and audit emission.
pub struct SecurityGate {
    auth: std::sync::Arc<dyn AuthProvider>,
    rate_limiter: RateLimiter,
    audit: std::sync::Arc<dyn AuditSink>,
}

impl SecurityGate {
    pub fn new(
        auth: std::sync::Arc<dyn AuthProvider>,
        rate_limiter: RateLimiter,
        audit: std::sync::Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            auth,
            rate_limiter,
            audit,
        }
    }

    /// Steps 1, 2, 4: authenticate, authorize, rate-limit. Step 5 (audit)
    /// is emitted separately by the caller once the operation's outcome
    /// is known, via `audit`.
    pub async fn admit(
        &self,
        credential: &str,
        required: &[Permission],
    ) -> Result<User, SecurityError> {
        let user = self.auth.resolve(credential).await.map_err(|e| {
            tracing::warn!(error = %e, "authentication failed");
            e
        })?;

        if !user.has_all(required) {
            let err = SecurityError::Forbidden(format!("{required:?}"));
            tracing::warn!(user_id = %user.user_id, required = ?required, "forbidden");
            return Err(err);
        }

        if let Err(err) = self.rate_limiter.try_acquire(user.role) {
            tracing::warn!(user_id = %user.user_id, role = ?user.role, "rate limited");
            return Err(err);
        }

        Ok(user)
    }

    /// Step 3: injects `(owner_id = user.user_id) OR has(ReadAll)` into a
    /// read filter. Never trusts caller-supplied `owner_id` — this is the
    /// only place a read-scoping predicate is produced.
    pub fn scope_read(&self, user: &User, expr: ExprBuilder) -> ExprBuilder {
        expr.and_owner_or_read_all(&user.user_id, user.has(Permission::ReadAll))
    }

    /// Step 3 for write/delete on a specific id: the fragment's actual
    /// `owner_id` must match the caller, or the caller needs admin
    /// privilege escalation.
    pub fn check_owner(&self, user: &User, fragment_owner_id: &str) -> Result<(), SecurityError> {
        if fragment_owner_id == user.user_id || user.has(Permission::Admin) {
            Ok(())
        } else {
            Err(SecurityError::Forbidden(
                "owner mismatch on write/delete".to_string(),
            ))
        }
    }

    /// Starts the audit sink's background drain loop. Part of the
    /// coordinator's explicit lifecycle — no background work runs before
    /// `CoordinatorAPI::start()` calls this.
    pub fn start(&self) {
        self.audit.start();
    }

    /// Stops the audit sink's background drain loop.
    pub fn stop(&self) {
        self.audit.stop();
    }

    /// Step 5: emit a structured audit record. Never blocks the request
    /// path (spec.md §4.3 step 5, §5 back-pressure rules).
    pub fn audit(
        &self,
        user: &User,
        op: &str,
        resource_id: Option<Uuid>,
        outcome: &str,
        error: Option<String>,
    ) {
        let record = AuditRecord {
            ts: Utc::now(),
            user_id: user.user_id.clone(),
            role: user.role,
            op: op.to_string(),
            resource_id,
            outcome: outcome.to_string(),
            error,
            saga_id: None,
        };
        self.audit.emit(record);
    }
}

pub fn required_permissions(access: Access) -> Vec<Permission> {
    match access {
        Access::Read => vec![Permission::Read],
        Access::Write => vec![Permission::Write],
        Access::Delete => vec![Permission::Delete],
    }
}
