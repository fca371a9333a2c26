use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or malformed bearer token")]
    AuthMissing,

    #[error("token does not belong to any group")]
    AuthInvalid,

    #[error("route '/v1/{path}' is not supported")]
    RouteUnknown { path: String },

    #[error("bad request payload: {reason}")]
    BadPayload { reason: String },

    #[error("no compatible backend for model '{model}'")]
    NoCompatibleBackend { model: String },

    #[error("no backend with fresh capacity data")]
    NoCapacity,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("reload failed: {0}")]
    Reload(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::AuthMissing => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_token",
                "missing or malformed bearer token".to_string(),
            ),
            AppError::AuthInvalid => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "invalid_token",
                "token does not belong to any authorized group".to_string(),
            ),
            AppError::RouteUnknown { path } => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "route_unknown",
                format!("the route '/v1/{}' is not supported", path),
            ),
            AppError::BadPayload { reason } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_payload",
                reason.clone(),
            ),
            AppError::NoCompatibleBackend { model } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "capacity_error",
                "no_compatible_backend",
                format!("no compatible backend found for model '{}'", model),
            ),
            AppError::NoCapacity => (
                StatusCode::SERVICE_UNAVAILABLE,
                "capacity_error",
                "no_capacity",
                "no backend with sufficient capacity".to_string(),
            ),
            AppError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            AppError::Reload(e) => {
                tracing::error!("Reload error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "reload_failed",
                    format!("reload failed: {}", e),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
