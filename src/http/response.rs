//! Response instrumentation and the per-request completion record.
//!
//! # Responsibilities
//! - Capture the final status code of the response
//! - Wrap the response body so bytes written are counted
//! - Emit exactly one "Request handled" record per request
//!
//! # Design Decisions
//! - The record is emitted when the response body finishes or is dropped,
//!   so `bw` covers the whole body
//! - A request whose handler panicked gets its record from the recovery
//!   stage instead; the guard is never created on that path

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::Span;

use crate::http::body::{CountingResponseBody, RequestMetrics};
use crate::http::request::Origin;

/// Request attributes logged on completion.
#[derive(Debug, Clone, Default)]
pub struct RequestSummary {
    pub method: String,
    pub path: String,
    pub user_agent: String,
    pub client_addr: String,
    /// Effective scheme after trust resolution, empty when unknown.
    pub scheme: String,
}

impl RequestSummary {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let (client_addr, scheme) = req
            .extensions()
            .get::<Origin>()
            .map(|origin| {
                (
                    origin.client_addr.clone(),
                    origin.scheme.clone().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        Self {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            user_agent,
            client_addr,
            scheme,
        }
    }
}

/// Emits the completion record for one request when dropped.
pub struct CompletionGuard {
    span: Span,
    metrics: Arc<RequestMetrics>,
    summary: RequestSummary,
}

impl CompletionGuard {
    pub fn new(span: Span, metrics: Arc<RequestMetrics>, summary: RequestSummary) -> Self {
        Self {
            span,
            metrics,
            summary,
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let metrics = &self.metrics;
        let summary = &self.summary;
        self.span.in_scope(|| {
            tracing::info!(
                method = %summary.method,
                path = %summary.path,
                ua = %summary.user_agent,
                ip = %summary.client_addr,
                scheme = %summary.scheme,
                bw = metrics.bytes_written(),
                br = metrics.bytes_read(),
                status = metrics.status(),
                duration = metrics.elapsed().as_nanos() as u64,
                "Request handled"
            );
        });
    }
}

/// Record the final status and install the counting body on `response`.
pub fn instrument_response(
    response: Response,
    span: Span,
    metrics: Arc<RequestMetrics>,
    summary: RequestSummary,
) -> Response {
    metrics.set_status(response.status());
    let guard = CompletionGuard::new(span, metrics.clone(), summary);
    response.map(|body| Body::new(CountingResponseBody::new(body, metrics, guard)))
}

/// Plain-text error response.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

/// Fail-safe response for requests whose handler panicked.
pub fn internal_server_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

/// Response for bodies that exceeded the configured limit.
pub fn payload_too_large() -> Response {
    error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
}
