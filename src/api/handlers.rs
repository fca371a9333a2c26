//! Operational endpoints: fleet health dump, raw metrics aggregation, and
//! the admin-triggered reload.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::probe::ModelDescriptor;
use crate::proxy::handler::bearer_token;
use crate::AppState;

/// Budget for each backend's raw `/metrics` fetch; one slow backend must not
/// stall the whole dump.
const METRICS_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
pub struct HealthReport {
    pub servers: Vec<ServerStatus>,
}

#[derive(Serialize)]
pub struct ServerStatus {
    pub url: String,
    pub healthy: bool,
    pub metrics_cached: Option<f64>,
    pub model_cached: Option<ModelDescriptor>,
}

/// `GET /health`: health flag and current cache contents per backend.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let servers = state
        .registry
        .snapshot()
        .iter()
        .map(|backend| ServerStatus {
            url: backend.url.clone(),
            healthy: state.health.reported_healthy(&backend.url),
            metrics_cached: state.metrics_cache.get(&backend.url),
            model_cached: state.model_cache.get(&backend.url),
        })
        .collect();
    Json(HealthReport { servers })
}

/// `GET /metrics`: each backend's raw Prometheus dump, keyed by URL.
/// Failures become `"Error: <reason>"` strings; no backend blocks another.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    let fetches = snapshot.iter().map(|backend| {
        let url = backend.url.clone();
        let client = state.upstream.probe.clone();
        async move {
            let fetched: anyhow::Result<String> = async {
                let response = client
                    .get(format!("{url}/metrics"))
                    .timeout(METRICS_FETCH_TIMEOUT)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.text().await?)
            }
            .await;
            let value = match fetched {
                Ok(text) => Value::String(text),
                Err(err) => {
                    tracing::warn!(backend = %url, error = %err, "metrics dump fetch failed");
                    Value::String(format!("Error: {err}"))
                }
            };
            (url, value)
        }
    });

    let map: serde_json::Map<String, Value> = join_all(fetches).await.into_iter().collect();
    Json(Value::Object(map))
}

/// `POST /reload`: admin-only re-read of config and secrets.
pub async fn reload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::AuthMissing)?;
    let group = {
        let directory = state.directory.load();
        let group = directory
            .group_for_token(token)
            .ok_or(AppError::AuthInvalid)?;
        if !directory.is_admin(group) {
            return Err(AppError::AuthInvalid);
        }
        group.to_string()
    };

    state.reload().map_err(AppError::Reload)?;
    tracing::info!(group = %group, "configuration reloaded");
    Ok(Json(json!({ "status": "reloaded" })))
}
