//! `CoordinatorConfig` (spec.md §6.4, SPEC_FULL §2.4): one struct per
//! concern, each with a `Default` matching the table's implied
//! defaults. No file/env loading is part of the core — the embedding
//! application constructs this programmatically.

use std::time::Duration;

use crate::saga::SagaConfig;
use crate::security::RateLimitConfig;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub default_ttl: Duration,
    pub partitions: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            default_ttl: Duration::from_secs(300),
            partitions: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub default_timeout: Duration,
    pub per_backend_timeout_fraction: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            per_backend_timeout_fraction: 0.9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub chunk_size: usize,
    pub upload_ttl: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
            upload_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub sweep_interval: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOverflowPolicy {
    DropOldest,
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub buffer_size: usize,
    pub overflow_policy: AuditOverflowPolicy,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            overflow_policy: AuditOverflowPolicy::DropOldest,
        }
    }
}

/// Aggregates every per-concern config struct (spec.md §6.4).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub cache: CacheConfig,
    pub saga: SagaConfig,
    pub batch: BatchConfig,
    pub ratelimit: RateLimitConfig,
    pub streaming: StreamingConfig,
    pub archive: ArchiveConfig,
    pub audit: AuditConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            saga: SagaConfig::default(),
            batch: BatchConfig::default(),
            ratelimit: RateLimitConfig::default(),
            streaming: StreamingConfig::default(),
            archive: ArchiveConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Builder-style override, e.g. `CoordinatorConfig::default().with_saga(...)`.
    pub fn with_saga(mut self, saga: SagaConfig) -> Self {
        self.saga = saga;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}
