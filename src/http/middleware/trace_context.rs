//! Trace context stage.
//!
//! Asks the telemetry collaborator for the caller's trace context and
//! attaches it as an extension; the context builder parents the request
//! span on it.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::middleware::PipelineState;
use crate::observability::TraceContext;

pub async fn trace_context_middleware(
    State(state): State<PipelineState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(trace) = state.telemetry.span_context(req.headers()) {
        if let Some(parent) = trace.remote_trace_id() {
            tracing::trace!(parent = %parent, "Continuing caller trace");
        }
        req.extensions_mut().insert::<TraceContext>(trace);
    }
    next.run(req).await
}
