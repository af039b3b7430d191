//! Effective permission cache keyed by principal
//!
//! Invalidation is explicit: the engine calls [`PermissionCache::invalidate_all`]
//! synchronously on every write, before the write call returns.
//!
//! A generation counter guards against a check that resolved its set before a
//! write and stores it after the write invalidated the cache. Readers capture
//! [`PermissionCache::generation`] before resolving and pass it to
//! [`PermissionCache::put`]; a set resolved under an older generation is
//! dropped. Stores hold the shared side of a gate while they compare and
//! insert, invalidations hold the exclusive side while they bump and clear.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::decision::EffectivePermissions;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable to resolve every check from the stores
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Time-to-live for cached effective sets, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached principals
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_capacity() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_secs: default_ttl_secs(),
            capacity: default_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cached entry with TTL
#[derive(Clone)]
struct CachedEntry {
    permissions: Arc<EffectivePermissions>,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(permissions: Arc<EffectivePermissions>) -> Self {
        Self {
            permissions,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        if self.cached_at.elapsed() > ttl {
            return true;
        }

        self.permissions
            .valid_until()
            .map_or(false, |valid_until| valid_until <= Utc::now())
    }
}

/// Per-principal effective permission cache
///
/// Thread-safe via `DashMap`; readers never block each other.
pub struct PermissionCache {
    entries: DashMap<String, CachedEntry>,
    config: CacheConfig,
    ttl: Duration,
    generation: AtomicU64,
    gate: RwLock<()>,
    stats: DashMap<String, usize>,
}

impl PermissionCache {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl(),
            config,
            generation: AtomicU64::new(0),
            gate: RwLock::new(()),
            stats: DashMap::new(),
        }
    }

    /// Whether caching is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cached set for a principal, if present and still fresh
    pub fn get(&self, principal_id: &str) -> Option<Arc<EffectivePermissions>> {
        if !self.config.enabled {
            return None;
        }

        if let Some(entry) = self.entries.get(principal_id) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.entries.remove(principal_id);
                self.increment_stat("expirations");
                self.increment_stat("misses");
                return None;
            }

            self.increment_stat("hits");
            return Some(entry.permissions.clone());
        }

        self.increment_stat("misses");
        None
    }

    /// Stores a set resolved under `generation`
    ///
    /// Returns false if the cache was invalidated since `generation` was read;
    /// the set is then discarded.
    pub fn put(
        &self,
        principal_id: &str,
        permissions: Arc<EffectivePermissions>,
        generation: u64,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let _gate = self.gate.read();
        if self.generation() != generation {
            return false;
        }

        if self.entries.len() >= self.config.capacity {
            self.evict_oldest();
        }

        self.entries
            .insert(principal_id.to_string(), CachedEntry::new(permissions));
        true
    }

    /// Drops the entry of one principal
    pub fn invalidate(&self, principal_id: &str) {
        let removed = {
            let _gate = self.gate.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.entries.remove(principal_id).is_some()
        };

        if removed {
            debug!(principal = %principal_id, "Invalidated cached permissions");
        }
        self.increment_stat("invalidations");
    }

    /// Drops every entry
    pub fn invalidate_all(&self) {
        let dropped = {
            let _gate = self.gate.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            let dropped = self.entries.len();
            self.entries.clear();
            dropped
        };
        self.increment_stat("invalidations");
        debug!(dropped, "Invalidated permission cache");
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            invalidations: self.get_stat("invalidations"),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Evicts the oldest tenth of the entries (at least one)
    fn evict_oldest(&self) {
        let mut ages: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().cached_at))
            .collect();
        ages.sort_by_key(|(_, cached_at)| *cached_at);

        let to_remove = (self.config.capacity / 10).max(1);
        for (principal_id, _) in ages.into_iter().take(to_remove) {
            self.entries.remove(&principal_id);
        }
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub invalidations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
