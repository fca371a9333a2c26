//! The dispatcher: authenticates, routes, selects a backend, rewrites
//! authentication, and forwards the request.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::probe::{self, ModelDescriptor};
use crate::proxy::streaming;
use crate::AppState;

const SUPPORTED_ROUTES: [&str; 4] = ["chat/completions", "completions", "models", "embeddings"];

/// Inbound headers never copied to the outbound request. Authentication is
/// rewritten, the body may be re-framed, and Accept-Encoding is negotiated
/// separately.
const DROPPED_REQUEST_HEADERS: [&str; 4] = [
    "content-length",
    "authorization",
    "api-key",
    "accept-encoding",
];

/// Handler for `/v1/{path}` inference traffic and the aggregated model list.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::AuthMissing)?;
    let group = state
        .directory
        .load()
        .group_for_token(token)
        .ok_or(AppError::AuthInvalid)?
        .to_string();

    if !SUPPORTED_ROUTES.contains(&path.as_str()) {
        return Err(AppError::RouteUnknown { path });
    }
    if path == "models" {
        return aggregate_models(&state, &group).await;
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|err| AppError::BadPayload {
        reason: format!("invalid JSON body: {err}"),
    })?;
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadPayload {
            reason: "missing 'model' in payload".into(),
        })?
        .to_string();
    tracing::info!(model = %model, group = %group, "dispatching inference request");

    // Backends visible to the group, breaker-closed, and hosting the model.
    let snapshot = state.registry.snapshot();
    let mut compatible = Vec::new();
    for backend in snapshot.iter() {
        if !backend.allowed_groups.contains(&group) || !state.health.is_usable(&backend.url) {
            continue;
        }
        match probe::probe_model(&state, &backend.url).await {
            Some(descriptor) if descriptor.id == model => compatible.push(backend.url.clone()),
            _ => {}
        }
    }
    if compatible.is_empty() {
        return Err(AppError::NoCompatibleBackend { model });
    }

    let mut loads = Vec::with_capacity(compatible.len());
    for url in &compatible {
        loads.push((url.clone(), probe::probe_metrics(&state, url).await));
    }
    let candidates = minimum_load_candidates(&loads);
    let chosen = state
        .registry
        .claim_least_recently_used(&candidates)
        .ok_or(AppError::NoCapacity)?;
    tracing::info!(backend = %chosen, model = %model, "selected least-loaded backend");

    let settings = state.settings.load_full();
    let outbound_headers = outbound_request_headers(&headers, &settings.vllm_token)?;
    let target = match &query {
        Some(q) => format!("{chosen}/v1/{path}?{q}"),
        None => format!("{chosen}/v1/{path}"),
    };
    let outbound_body =
        (method == Method::POST || method == Method::PUT).then(|| body.clone());

    if json_truthy(payload.get("stream")) {
        streaming::relay(
            &state.upstream.streaming,
            method,
            &target,
            outbound_headers,
            outbound_body,
        )
        .await
    } else {
        forward_buffered(
            &state.upstream.buffered,
            method,
            &target,
            outbound_headers,
            outbound_body,
        )
        .await
    }
}

/// Aggregated `/v1/models` across all backends the group may reach:
/// de-duplicated by id, keeping the earliest `created`, stamped with the
/// configured owner.
async fn aggregate_models(state: &AppState, group: &str) -> Result<Response, AppError> {
    let snapshot = state.registry.snapshot();
    let mut descriptors = Vec::new();
    for backend in snapshot.iter() {
        if !backend.allowed_groups.contains(group) || !state.health.is_usable(&backend.url) {
            continue;
        }
        if let Some(descriptor) = probe::probe_model(state, &backend.url).await {
            descriptors.push(descriptor);
        }
    }
    let owner = state.settings.load().model_owner.clone();
    Ok(Json(merge_model_listings(descriptors, &owner)).into_response())
}

pub(crate) fn merge_model_listings(descriptors: Vec<ModelDescriptor>, owner: &str) -> Value {
    let mut merged: Vec<(String, i64)> = Vec::new();
    for descriptor in descriptors {
        match merged.iter_mut().find(|(id, _)| *id == descriptor.id) {
            Some((_, created)) => *created = (*created).min(descriptor.created),
            None => merged.push((descriptor.id, descriptor.created)),
        }
    }
    let data: Vec<Value> = merged
        .into_iter()
        .map(|(id, created)| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": owner,
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

/// URLs tied at the minimum fresh load. Backends without fresh load data are
/// excluded; an empty result means nothing is selectable right now.
pub(crate) fn minimum_load_candidates(loads: &[(String, Option<f64>)]) -> Vec<String> {
    let min = loads
        .iter()
        .filter_map(|(_, load)| *load)
        .fold(f64::INFINITY, f64::min);
    if min.is_infinite() {
        return Vec::new();
    }
    loads
        .iter()
        .filter(|(_, load)| *load == Some(min))
        .map(|(url, _)| url.clone())
        .collect()
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Copy the inbound headers minus the rewritten set, swap in the fleet
/// token, and negotiate Accept-Encoding.
fn outbound_request_headers(inbound: &HeaderMap, vllm_token: &str) -> Result<HeaderMap, AppError> {
    let mut outbound = HeaderMap::new();
    for (name, value) in inbound {
        if DROPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }
    let auth = HeaderValue::from_str(&format!("Bearer {vllm_token}"))
        .map_err(|_| AppError::Internal(anyhow::anyhow!("vllm_token is not a valid header value")))?;
    outbound.insert(header::AUTHORIZATION, auth);
    outbound.insert(
        header::ACCEPT_ENCODING,
        forwarded_accept_encoding(inbound.get(header::ACCEPT_ENCODING)),
    );
    Ok(outbound)
}

/// Backends only speak gzip: keep the client's value when it already is
/// `gzip` or `gzip, deflate`, otherwise force `gzip`.
fn forwarded_accept_encoding(client: Option<&HeaderValue>) -> HeaderValue {
    match client.and_then(|value| value.to_str().ok()) {
        Some("gzip") => HeaderValue::from_static("gzip"),
        Some("gzip, deflate") => HeaderValue::from_static("gzip, deflate"),
        Some(other) => {
            tracing::warn!(
                requested = other,
                "unsupported Accept-Encoding, forcing gzip"
            );
            HeaderValue::from_static("gzip")
        }
        None => HeaderValue::from_static("gzip"),
    }
}

fn json_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}

async fn forward_buffered(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Option<Bytes>,
) -> Result<Response, AppError> {
    let mut request = client.request(method, url).headers(headers);
    if let Some(bytes) = body {
        request = request.body(bytes);
    }
    let upstream = request.send().await.map_err(|err| {
        tracing::warn!(backend = url, error = %err, "buffered upstream request failed");
        AppError::Upstream(err.to_string())
    })?;

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|err| AppError::Upstream(err.to_string()))?;

    let mut response = Response::builder()
        .status(status)
        .body(Body::from(bytes))
        .map_err(|err| AppError::Internal(anyhow::anyhow!("response build failed: {err}")))?;
    for (name, value) in &upstream_headers {
        if name == header::CONTENT_LENGTH {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    Ok(response)
}
