//! Streaming relay: non-buffered byte forwarding from an upstream backend.
//!
//! Upstream error statuses are buffered and returned as plain responses.
//! Successful responses stream chunk by chunk; a mid-stream upstream failure
//! is signalled in-band with an SSE error trailer because the status line has
//! already been sent. The upstream response is owned by the relayed stream,
//! so any exit (completion, failure, or the client hanging up and the body
//! being dropped) releases the pooled connection.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::errors::AppError;

/// Literal trailer emitted when the upstream dies mid-stream.
pub const STREAM_ERROR_TRAILER: &[u8] =
    b"event: error\ndata: {\"error\": \"Streaming interrupted\"}\n\n";

/// Forward a streaming inference request and relay the response bytes as they
/// arrive.
pub async fn relay(
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
        tracing::warn!(backend = url, error = %err, "streaming upstream unreachable");
        AppError::Upstream(err.to_string())
    })?;

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();

    // Error responses are finite: read them fully and hand back a plain
    // response so the client sees the real status code.
    if status.as_u16() >= 400 {
        let bytes = upstream
            .bytes()
            .await
            .map_err(|err| AppError::Upstream(err.to_string()))?;
        return build_response(status, &upstream_headers, Body::from(bytes));
    }

    let relayed = guard_stream(upstream.bytes_stream());
    build_response(status, &upstream_headers, Body::from_stream(relayed))
}

/// Pass upstream chunks through; on the first stream error emit the SSE
/// error trailer and end the body. The wrapped stream owns the upstream
/// response, so dropping the body closes the connection.
pub(crate) fn guard_stream<S, E>(upstream: S) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        futures::pin_mut!(upstream);
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(err) => {
                    tracing::warn!(error = %err, "upstream stream interrupted, emitting error trailer");
                    yield Ok(Bytes::from_static(STREAM_ERROR_TRAILER));
                    break;
                }
            }
        }
    }
}

fn build_response(
    status: reqwest::StatusCode,
    upstream_headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let mut response = Response::builder()
        .status(status)
        .body(body)
        .map_err(|err| AppError::Internal(anyhow::anyhow!("response build failed: {err}")))?;
    for (name, value) in upstream_headers {
        if name == header::CONTENT_LENGTH {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect(chunks: Vec<Result<Bytes, String>>) -> Vec<Bytes> {
        guard_stream(stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_clean_stream_passes_through() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let out = collect(chunks).await;
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], b"data: one\n\n");
        assert_eq!(&out[1][..], b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_midstream_failure_appends_error_trailer() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Ok(Bytes::from_static(b"data: two\n\n")),
            Err("connection reset".to_string()),
        ];
        let out = collect(chunks).await;
        assert_eq!(out.len(), 3);
        assert_eq!(&out[0][..], b"data: one\n\n");
        assert_eq!(&out[1][..], b"data: two\n\n");
        assert_eq!(&out[2][..], STREAM_ERROR_TRAILER);
    }

    #[tokio::test]
    async fn test_stream_ends_after_trailer() {
        // A failure mid-stream must terminate the body even if the source
        // would produce more items afterwards.
        let chunks = vec![
            Err("reset".to_string()),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ];
        let out = collect(chunks).await;
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], STREAM_ERROR_TRAILER);
    }
}
