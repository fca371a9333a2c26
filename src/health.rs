//! Per-backend health tracking with a circuit breaker.
//!
//! Breaker lifecycle: the `max_failures`-th consecutive probe failure opens
//! the circuit for `cooldown` (the backend is reported unhealthy regardless
//! of its health flag). Once the cool-down elapses, `is_usable` permits one
//! trial probe. The failure count is NOT reset at that point, so a single
//! failing trial re-crosses the threshold and reopens the breaker for another
//! full cool-down; a successful probe clears everything.

use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    pub max_failures: u32,
    pub cooldown: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub healthy: bool,
    pub last_checked: Option<Instant>,
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<Instant>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            healthy: true,
            last_checked: None,
            consecutive_failures: 0,
            circuit_open_until: None,
        }
    }
}

pub struct HealthTracker {
    records: DashMap<String, HealthRecord>,
    policy: ArcSwap<BreakerPolicy>,
}

impl HealthTracker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            records: DashMap::new(),
            policy: ArcSwap::from_pointee(policy),
        }
    }

    pub fn set_policy(&self, policy: BreakerPolicy) {
        self.policy.store(Arc::new(policy));
    }

    /// Align tracked records with the given fleet: records for persisting
    /// URLs survive, new URLs start fresh, removed URLs are discarded.
    pub fn rebuild(&self, urls: &[String]) {
        self.records.retain(|url, _| urls.iter().any(|u| u == url));
        for url in urls {
            self.records.entry(url.clone()).or_default();
        }
    }

    /// Whether probes and selection may touch this backend.
    ///
    /// An elapsed cool-down transitions the record into a trial state:
    /// the breaker timestamp is cleared and the health flag restored, while
    /// the failure count stays at threshold so one failure reopens the
    /// breaker.
    pub fn is_usable(&self, url: &str) -> bool {
        let mut record = self.records.entry(url.to_string()).or_default();
        if let Some(open_until) = record.circuit_open_until {
            if Instant::now() < open_until {
                return false;
            }
            record.circuit_open_until = None;
            record.healthy = true;
        }
        record.healthy
    }

    pub fn record_success(&self, url: &str) {
        let mut record = self.records.entry(url.to_string()).or_default();
        record.healthy = true;
        record.consecutive_failures = 0;
        record.circuit_open_until = None;
        record.last_checked = Some(Instant::now());
    }

    pub fn record_failure(&self, url: &str) {
        let policy = **self.policy.load();
        let mut record = self.records.entry(url.to_string()).or_default();
        record.consecutive_failures += 1;
        if record.consecutive_failures >= policy.max_failures {
            record.circuit_open_until = Some(Instant::now() + policy.cooldown);
            tracing::warn!(
                backend = url,
                failures = record.consecutive_failures,
                "circuit opened: backend disabled for cool-down"
            );
        }
        record.healthy = false;
        record.last_checked = Some(Instant::now());
    }

    /// Read-only health view for the `/health` dump. Unlike `is_usable` this
    /// never mutates the record; a backend in cool-down reports unhealthy.
    pub fn reported_healthy(&self, url: &str) -> bool {
        match self.records.get(url) {
            Some(record) => {
                if let Some(open_until) = record.circuit_open_until {
                    if Instant::now() < open_until {
                        return false;
                    }
                }
                record.healthy
            }
            None => true,
        }
    }
}
