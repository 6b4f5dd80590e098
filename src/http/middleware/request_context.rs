//! Request context stage.
//!
//! Builds the request identity, opens the request span, installs the
//! counting request body and, once the handler returns, the counting
//! response body that emits the completion record.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{field, Instrument, Level};

use crate::http::body::{CountingBody, RequestMetrics};
use crate::http::middleware::recovery::{ContextSlot, RequestRecord};
use crate::http::middleware::PipelineState;
use crate::http::request::{RequestContext, RequestIdentity, X_REQUEST_ID};
use crate::http::response::{instrument_response, payload_too_large, RequestSummary};
use crate::observability::TraceContext;

pub async fn request_context_middleware(
    State(state): State<PipelineState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let summary = RequestSummary::from_request(&req);
    let name = format!("{} {}", summary.method, summary.path);

    // ERROR level keeps the span, and with it the identity, enabled at
    // every log level.
    let span = tracing::span!(
        Level::ERROR,
        "request",
        reqId = field::Empty,
        traceId = field::Empty,
        otel.name = name.as_str(),
        otel.kind = "server"
    );
    let trace_id = req
        .extensions()
        .get::<TraceContext>()
        .and_then(|trace| trace.attach(&span));
    let identity = RequestIdentity::build(req.headers(), trace_id);
    span.record("reqId", identity.request_id.as_str());
    span.record("traceId", identity.trace_id.as_str());

    let metrics = Arc::new(RequestMetrics::new());
    if let Some(slot) = req.extensions().get::<ContextSlot>() {
        slot.fill(RequestRecord {
            identity: identity.clone(),
            summary: summary.clone(),
            metrics: metrics.clone(),
        });
    }

    let (mut parts, body) = req.into_parts();
    parts
        .extensions
        .insert(RequestContext::new(identity.clone(), span.clone()));
    let body = Body::new(CountingBody::new(
        body,
        metrics.clone(),
        state.max_request_bytes,
    ));
    let req = Request::from_parts(parts, body);

    let mut response = next.run(req).instrument(span.clone()).await;

    if metrics.payload_too_large() {
        span.in_scope(|| {
            tracing::warn!(
                limit = state.max_request_bytes,
                br = metrics.bytes_read(),
                "Request body too large"
            );
        });
        response = payload_too_large();
    }

    if let Ok(value) = HeaderValue::from_str(&identity.request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    instrument_response(response, span, metrics, summary)
}
