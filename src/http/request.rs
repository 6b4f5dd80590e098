//! Per-request identity and context.
//!
//! # Responsibilities
//! - Reuse or generate the request ID (UUID)
//! - Carry the trace ID of the active trace context
//! - Expose the request-scoped context (identity, span) to handlers as a
//!   typed extractor
//!
//! # Design Decisions
//! - A valid inbound ID is echoed as sent; a malformed one is replaced,
//!   never rejected
//! - The request span is the request-scoped logger: every event emitted
//!   under it carries `reqId` and `traceId`

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use opentelemetry::trace::TraceId;
use tracing::Span;
use uuid::Uuid;

/// Inbound request ID header.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation identifiers of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// The inbound UUID as sent, or a fresh hyphenated lower-case one.
    pub request_id: String,
    /// Hex trace ID, empty when no trace is active.
    pub trace_id: String,
}

impl RequestIdentity {
    /// Build the identity from inbound headers and the active trace id.
    pub fn build(headers: &HeaderMap, trace_id: Option<TraceId>) -> Self {
        let request_id = headers
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| Uuid::parse_str(v).is_ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let trace_id = trace_id.map(|id| id.to_string()).unwrap_or_default();

        Self {
            request_id,
            trace_id,
        }
    }
}

/// Perceived origin of a request after trust resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Client address: forwarded client IP for trusted proxies, else the
    /// transport peer (`ip:port`).
    pub client_addr: String,
    /// Effective host, if known.
    pub host: Option<String>,
    /// Effective scheme, if known.
    pub scheme: Option<String>,
}

/// Request-scoped context handed to every stage after the context builder.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: RequestIdentity,
    span: Span,
}

impl RequestContext {
    pub fn new(identity: RequestIdentity, span: Span) -> Self {
        Self { identity, span }
    }

    /// The request span; events emitted inside it carry the request's identity.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "request context missing",
        ))
    }
}

impl<S> FromRequestParts<S> for Origin
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Origin>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "request origin missing"))
    }
}
