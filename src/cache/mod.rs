//! Single-record LRU+TTL cache with pattern invalidation (spec.md §4.2, C2).
//!
//! Hand-rolled rather than built on a general-purpose cache crate: the
//! contract requires a specific eviction order (TTL check precedes LRU
//! promotion) and an `invalidate_pattern` regex sweep that off-the-shelf
//! LRU crates don't expose. Partitioned by `hash(key) mod P` the way
//! spec.md §4.2's concurrency note allows, each partition behind its own
//! `std::sync::Mutex` — the critical sections are pure in-memory list/map
//! surgery, never an `.await`, so a blocking mutex is the right tool
//! (mirrors the teacher's use of `std::sync::Mutex` for its in-process
//! registries).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::DocumentId;

const DEFAULT_PARTITIONS: usize = 16;

/// One cached value plus the bookkeeping the LRU+TTL algorithm needs.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

/// `stats()` snapshot (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Partition<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Most-recently-used key is the back of this list.
    order: Vec<String>,
    stats: CacheStats,
}

impl<V> Partition<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    fn evict_lru(&mut self) {
        if !self.order.is_empty() {
            let victim = self.order.remove(0);
            self.entries.remove(&victim);
            self.stats.evictions += 1;
        }
    }
}

/// LRU+TTL cache, partitioned for concurrency (spec.md §4.2).
///
/// `V` is the cached value type; the coordinator instantiates this with
/// `Document` for the read-through document cache.
pub struct Cache<V: Clone> {
    partitions: Vec<Mutex<Partition<V>>>,
    capacity_per_partition: usize,
    default_ttl: Duration,
}

impl<V: Clone> Cache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self::with_partitions(capacity, default_ttl, DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(capacity: usize, default_ttl: Duration, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let capacity_per_partition = (capacity / partitions).max(1);
        Self {
            partitions: (0..partitions).map(|_| Mutex::new(Partition::new())).collect(),
            capacity_per_partition,
            default_ttl,
        }
    }

    fn partition_for(&self, key: &str) -> &Mutex<Partition<V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.partitions.len();
        &self.partitions[idx]
    }

    /// `get(key) -> value | Miss`. TTL check precedes LRU promotion: an
    /// expired entry is evicted here even though it was just accessed.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut part = self.partition_for(key).lock().unwrap();
        let now = Utc::now();
        let expired = part.entries.get(key).map(|e| now >= e.expires_at);
        match expired {
            Some(true) => {
                part.remove(key);
                part.stats.evictions += 1;
                part.stats.misses += 1;
                None
            }
            Some(false) => {
                part.touch(key);
                if let Some(e) = part.entries.get_mut(key) {
                    e.last_accessed = now;
                }
                part.stats.hits += 1;
                part.entries.get(key).map(|e| e.value.clone())
            }
            None => {
                part.stats.misses += 1;
                None
            }
        }
    }

    /// `put(key, value, ttl?)`; default TTL from config when `ttl` is `None`.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let mut part = self.partition_for(&key).lock().unwrap();
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));

        if !part.entries.contains_key(&key) && part.entries.len() >= self.capacity_per_partition {
            part.evict_lru();
        }
        part.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
                last_accessed: now,
            },
        );
        part.touch(&key);
        if part.order.iter().filter(|k| **k == key).count() == 0 {
            part.order.push(key);
        }
        part.stats.size = part.entries.len();
    }

    pub fn invalidate(&self, key: &str) {
        let mut part = self.partition_for(key).lock().unwrap();
        part.remove(key);
        part.stats.size = part.entries.len();
    }

    /// Sweeps every partition, removing keys matching `pattern`.
    pub fn invalidate_pattern(&self, pattern: &Regex) {
        for part_lock in &self.partitions {
            let mut part = part_lock.lock().unwrap();
            let doomed: Vec<String> = part
                .entries
                .keys()
                .filter(|k| pattern.is_match(k))
                .cloned()
                .collect();
            for key in doomed {
                part.remove(&key);
            }
            part.stats.size = part.entries.len();
        }
    }

    /// Background sweeper pass: evicts every expired entry regardless of
    /// access. Intended to be invoked on a fixed cadence (spec.md §4.2).
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut total = 0;
        for part_lock in &self.partitions {
            let mut part = part_lock.lock().unwrap();
            let doomed: Vec<String> = part
                .entries
                .iter()
                .filter(|(_, e)| now >= e.expires_at)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &doomed {
                part.remove(key);
                part.stats.evictions += 1;
            }
            part.stats.size = part.entries.len();
            total += doomed.len();
        }
        total
    }

    /// Aggregate `stats()` across all partitions.
    pub fn stats(&self) -> CacheStats {
        self.partitions.iter().fold(CacheStats::default(), |acc, p| {
            let part = p.lock().unwrap();
            CacheStats {
                hits: acc.hits + part.stats.hits,
                misses: acc.misses + part.stats.misses,
                evictions: acc.evictions + part.stats.evictions,
                size: acc.size + part.entries.len(),
            }
        })
    }
}

/// Cache key convention for document-id-keyed entries.
pub fn document_key(id: DocumentId) -> String {
    format!("doc:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn miss_then_hit_after_put() {
        let cache: Cache<i32> = Cache::new(8, StdDuration::from_secs(60));
        assert_eq!(cache.get("a"), None);
        cache.put("a", 1, None);
        assert_eq!(cache.get("a"), Some(1));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entry_is_evicted_on_access_even_if_recent() {
        let cache: Cache<i32> = Cache::with_partitions(8, StdDuration::from_secs(60), 1);
        cache.put("a", 1, Some(StdDuration::from_millis(0)));
        std::thread::sleep(StdDuration::from_millis(5));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn capacity_pressure_evicts_lru_tail() {
        let cache: Cache<i32> = Cache::with_partitions(2, StdDuration::from_secs(60), 1);
        cache.put("a", 1, None);
        cache.put("b", 2, None);
        cache.get("a");
        cache.put("c", 3, None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn invalidate_pattern_removes_matching_keys() {
        let cache: Cache<i32> = Cache::new(8, StdDuration::from_secs(60));
        cache.put("doc:1", 1, None);
        cache.put("doc:2", 2, None);
        cache.put("user:1", 3, None);
        let pattern = Regex::new("^doc:").unwrap();
        cache.invalidate_pattern(&pattern);
        assert_eq!(cache.get("doc:1"), None);
        assert_eq!(cache.get("doc:2"), None);
        assert_eq!(cache.get("user:1"), Some(3));
    }

    #[test]
    fn sweep_expired_evicts_without_access() {
        let cache: Cache<i32> = Cache::new(8, StdDuration::from_millis(0));
        cache.put("a", 1, None);
        std::thread::sleep(StdDuration::from_millis(5));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.stats().size, 0);
    }
}
