//! Per-role token-bucket rate limiting (spec.md §4.3 step 4, §6.4).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use super::{Role, SecurityError};

/// Refill rate and burst size for one role (spec.md §6.4:
/// `ratelimit.{role}.refill_per_sec`, `ratelimit.{role}.burst`).
#[derive(Debug, Clone, Copy)]
pub struct RoleLimit {
    pub refill_per_sec: f64,
    pub burst: f64,
}

impl Default for RoleLimit {
    fn default() -> Self {
        Self {
            refill_per_sec: 50.0,
            burst: 100.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limits: HashMap<RoleKey, RoleLimit>,
}

/// `Role` isn't `Hash`/`Eq` for `HashMap` convenience purposes elsewhere,
/// but rate-limit config needs role-keyed lookup, so this module keeps
/// its own small projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKey {
    System,
    Admin,
    Service,
    User,
    ReadOnly,
}

impl From<Role> for RoleKey {
    fn from(role: Role) -> Self {
        match role {
            Role::System => RoleKey::System,
            Role::Admin => RoleKey::Admin,
            Role::Service => RoleKey::Service,
            Role::User => RoleKey::User,
            Role::ReadOnly => RoleKey::ReadOnly,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(
            RoleKey::System,
            RoleLimit {
                refill_per_sec: 1000.0,
                burst: 2000.0,
            },
        );
        limits.insert(
            RoleKey::Admin,
            RoleLimit {
                refill_per_sec: 200.0,
                burst: 400.0,
            },
        );
        limits.insert(RoleKey::Service, RoleLimit::default());
        limits.insert(RoleKey::User, RoleLimit::default());
        limits.insert(
            RoleKey::ReadOnly,
            RoleLimit {
                refill_per_sec: 20.0,
                burst: 40.0,
            },
        );
        Self { limits }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter, one bucket per role, under a single lock —
/// buckets are cheap to update and contention is expected to be low
/// relative to adapter I/O (spec.md §5: "rate-limit buckets are per-role
/// shared state; updated under a lightweight lock").
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<RoleKey, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_acquire(&self, role: Role) -> Result<(), SecurityError> {
        let key = RoleKey::from(role);
        let limit = self.config.limits.get(&key).copied().unwrap_or_default();
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets.entry(key).or_insert_with(|| Bucket {
            tokens: limit.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * limit.refill_per_sec).min(limit.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after_ms = ((deficit / limit.refill_per_sec) * 1000.0).ceil() as u64;
            Err(SecurityError::RateLimited { retry_after_ms })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_consumable_then_limiter_blocks() {
        let mut config = RateLimitConfig::default();
        config.limits.insert(
            RoleKey::User,
            RoleLimit {
                refill_per_sec: 1.0,
                burst: 2.0,
            },
        );
        let limiter = RateLimiter::new(config);
        assert!(limiter.try_acquire(Role::User).is_ok());
        assert!(limiter.try_acquire(Role::User).is_ok());
        assert!(limiter.try_acquire(Role::User).is_err());
    }

    #[test]
    fn rate_limited_error_carries_retry_after() {
        let mut config = RateLimitConfig::default();
        config.limits.insert(
            RoleKey::User,
            RoleLimit {
                refill_per_sec: 1.0,
                burst: 1.0,
            },
        );
        let limiter = RateLimiter::new(config);
        limiter.try_acquire(Role::User).unwrap();
        let err = limiter.try_acquire(Role::User).unwrap_err();
        match err {
            SecurityError::RateLimited { retry_after_ms } => assert!(retry_after_ms > 0),
            _ => panic!("expected RateLimited"),
        }
    }
}
