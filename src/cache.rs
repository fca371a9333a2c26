//! TTL caches for probe results, keyed by backend URL.
//!
//! Two instances exist: a short-lived load cache and a longer-lived model
//! identity cache. Capacity is bounded; eviction beyond TTL expiry is
//! arbitrary and does not affect correctness.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub const CACHE_CAPACITY: usize = 100;
/// Shorter than the metrics refresh interval would be wrong; the refresh loop
/// runs every 100 ms so a healthy fleet never serves a stale miss.
pub const METRICS_TTL: Duration = Duration::from_millis(500);
pub const MODEL_TTL: Duration = Duration::from_secs(5);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Fresh value or miss. Expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: String, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop expired entries first; if still full, drop an arbitrary one.
    fn evict_one(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        if self.entries.len() >= self.capacity {
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            if let Some(key) = victim {
                self.entries.remove(&key);
            }
        }
    }
}
