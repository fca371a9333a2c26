//! Fleet registry: the immutable backend table plus utilization stamps.
//!
//! The backend table is copy-on-reload: readers take an `Arc` snapshot and
//! iterate without locking while `/reload` swaps in a new table. Utilization
//! stamps live behind one mutex so choose-and-stamp is a single atomic step;
//! two concurrent selections can never both claim the same least-recently-used
//! backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// One inference server instance. Immutable after load.
#[derive(Debug, Clone)]
pub struct Backend {
    pub url: String,
    pub allowed_groups: HashSet<String>,
}

pub struct FleetRegistry {
    backends: ArcSwap<Vec<Backend>>,
    /// url -> last time the dispatcher chose this backend. Absent = never.
    last_utilization: Mutex<HashMap<String, Instant>>,
}

impl FleetRegistry {
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends: ArcSwap::from_pointee(backends),
            last_utilization: Mutex::new(HashMap::new()),
        }
    }

    /// Point-in-time snapshot, safe to iterate without further locking.
    pub fn snapshot(&self) -> Arc<Vec<Backend>> {
        self.backends.load_full()
    }

    /// Stamp a backend as just-used. No-op if the URL is not in the current
    /// snapshot.
    pub fn mark_utilization(&self, url: &str) {
        let snapshot = self.snapshot();
        if !snapshot.iter().any(|b| b.url == url) {
            return;
        }
        self.last_utilization
            .lock()
            .insert(url.to_string(), Instant::now());
    }

    /// Pick the least-recently-used candidate and stamp it in one step.
    ///
    /// A candidate never chosen before wins immediately; otherwise the one
    /// with the oldest stamp wins, which realises deterministic round-robin
    /// among equally loaded backends.
    pub fn claim_least_recently_used(&self, candidates: &[String]) -> Option<String> {
        let snapshot = self.snapshot();
        let mut stamps = self.last_utilization.lock();

        let mut chosen: Option<(&String, Option<Instant>)> = None;
        for url in candidates {
            if !snapshot.iter().any(|b| b.url == *url) {
                continue;
            }
            match stamps.get(url) {
                None => {
                    chosen = Some((url, None));
                    break;
                }
                Some(&at) => {
                    let older = match chosen {
                        None => true,
                        Some((_, Some(best))) => at < best,
                        Some((_, None)) => false,
                    };
                    if older {
                        chosen = Some((url, Some(at)));
                    }
                }
            }
        }

        let url = chosen?.0.clone();
        stamps.insert(url.clone(), Instant::now());
        Some(url)
    }

    /// Swap in a new backend table. Utilization stamps are kept for URLs that
    /// persist and dropped for removed ones.
    pub fn rebuild(&self, backends: Vec<Backend>) {
        let mut stamps = self.last_utilization.lock();
        stamps.retain(|url, _| backends.iter().any(|b| b.url == *url));
        self.backends.store(Arc::new(backends));
    }
}
