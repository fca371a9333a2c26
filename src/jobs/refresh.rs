//! Background refresh: two periodic loops keep the load and model caches
//! warm for every backend in the current registry snapshot.
//!
//! Each tick probes the whole fleet concurrently. Cancellation propagates
//! into in-flight probes (the sweep future is raced against the token and
//! dropped on shutdown); individual probe failures only mutate health state
//! and never abort a loop.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::probe;
use crate::AppState;

/// Shorter than the metrics cache TTL so a healthy fleet never misses.
pub const METRICS_REFRESH_INTERVAL: Duration = Duration::from_millis(100);
pub const MODELS_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy)]
enum ProbeKind {
    Metrics,
    Models,
}

/// Spawn both refresh loops onto the tracker. Call once at startup; cancel
/// the token and `tracker.wait()` at shutdown.
pub fn spawn(state: Arc<AppState>, tracker: &TaskTracker, shutdown: CancellationToken) {
    tracker.spawn(refresh_loop(
        state.clone(),
        shutdown.clone(),
        METRICS_REFRESH_INTERVAL,
        ProbeKind::Metrics,
    ));
    tracker.spawn(refresh_loop(
        state,
        shutdown,
        MODELS_REFRESH_INTERVAL,
        ProbeKind::Models,
    ));
}

async fn refresh_loop(
    state: Arc<AppState>,
    shutdown: CancellationToken,
    period: Duration,
    kind: ProbeKind,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let snapshot = state.registry.snapshot();
        let sweep = join_all(snapshot.iter().map(|backend| {
            let state = state.clone();
            let url = backend.url.clone();
            async move {
                match kind {
                    ProbeKind::Metrics => {
                        probe::probe_metrics(&state, &url).await;
                    }
                    ProbeKind::Models => {
                        probe::probe_model(&state, &url).await;
                    }
                }
            }
        }));

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sweep => {}
        }
    }
}
