//! Backend probes: fleet load from `/metrics`, hosted model from
//! `/v1/models`. Every probe is gated by the circuit breaker, consults its
//! cache first, and reports the outcome to the health tracker.

use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;

pub const RUNNING_METRIC: &str = "vllm:num_requests_running";
pub const WAITING_METRIC: &str = "vllm:num_requests_waiting";

static METRIC_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(\.\d+)?)$").expect("metric value regex"));

/// The single model a backend serves, as reported by its `/v1/models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub created: i64,
}

/// Sum the running and waiting request gauges from a Prometheus text dump.
/// A matching metric line whose tail is not numeric is a parse error.
pub(crate) fn parse_fleet_load(text: &str) -> anyhow::Result<f64> {
    let mut total = 0.0;
    for line in text.lines() {
        if !(line.starts_with(RUNNING_METRIC) || line.starts_with(WAITING_METRIC)) {
            continue;
        }
        let value = METRIC_VALUE
            .captures(line.trim_end())
            .and_then(|captures| captures.get(1))
            .ok_or_else(|| anyhow!("unparseable metric line: {line}"))?;
        total += value.as_str().parse::<f64>()?;
    }
    Ok(total)
}

/// Current load (running + waiting) of a backend, or `None` when the backend
/// is gated, the probe fails, or the response cannot be parsed.
pub async fn probe_metrics(state: &AppState, url: &str) -> Option<f64> {
    if !state.health.is_usable(url) {
        return None;
    }
    if let Some(load) = state.metrics_cache.get(url) {
        return Some(load);
    }

    let timeout = state.settings.load().request_timeout;
    let fetched: anyhow::Result<f64> = async {
        let response = state
            .upstream
            .probe
            .get(format!("{url}/metrics"))
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        parse_fleet_load(&response.text().await?)
    }
    .await;

    match fetched {
        Ok(load) => {
            state.metrics_cache.insert(url.to_string(), load);
            state.health.record_success(url);
            tracing::debug!(backend = url, load, "metrics refreshed");
            Some(load)
        }
        Err(err) => {
            state.health.record_failure(url);
            tracing::warn!(backend = url, error = %err, "metrics probe failed");
            None
        }
    }
}

/// The model a backend hosts, or `None` when the backend is gated, fails the
/// probe, or reports an empty listing. An empty listing is still a successful
/// probe; anything other than an `{id, created}` object in `data[0]` is not.
pub async fn probe_model(state: &AppState, url: &str) -> Option<ModelDescriptor> {
    if !state.health.is_usable(url) {
        return None;
    }
    if let Some(descriptor) = state.model_cache.get(url) {
        return Some(descriptor);
    }

    let settings = state.settings.load_full();
    let fetched: anyhow::Result<Option<ModelDescriptor>> = async {
        let response = state
            .upstream
            .probe
            .get(format!("{url}/v1/models"))
            .bearer_auth(&settings.vllm_token)
            .timeout(settings.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        let listing: Value = response.json().await?;
        let Some(first) = listing
            .get("data")
            .and_then(Value::as_array)
            .and_then(|data| data.first())
        else {
            return Ok(None);
        };
        let descriptor: ModelDescriptor = serde_json::from_value(first.clone())
            .map_err(|err| anyhow!("malformed model descriptor: {err}"))?;
        Ok(Some(descriptor))
    }
    .await;

    match fetched {
        Ok(Some(descriptor)) => {
            state.model_cache.insert(url.to_string(), descriptor.clone());
            state.health.record_success(url);
            tracing::debug!(backend = url, model = %descriptor.id, "model refreshed");
            Some(descriptor)
        }
        Ok(None) => {
            state.health.record_success(url);
            tracing::debug!(backend = url, "model listing empty");
            None
        }
        Err(err) => {
            state.health.record_failure(url);
            tracing::warn!(backend = url, error = %err, "model probe failed");
            None
        }
    }
}
