//! Request pipeline.
//!
//! # Stage Order
//! ```text
//! recovery          (catch panics, log them with the request's fields, answer 500)
//!     → trust_proxy     (rewrite origin behind trusted proxies)
//!     → trace_context   (span context from the telemetry collaborator)
//!     → request_context (identity, request span, counting bodies)
//!     → handler
//!     ← completion record when the response body ends
//! ```

pub mod recovery;
pub mod request_context;
pub mod trace_context;
pub mod trust_proxy;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;

use crate::observability::Telemetry;
use crate::security::TrustResolver;

pub use recovery::{install_panic_hook, ContextSlot};

/// State shared by every pipeline stage.
#[derive(Clone)]
pub struct PipelineState {
    pub resolver: Arc<TrustResolver>,
    pub telemetry: Arc<dyn Telemetry>,
    pub max_request_bytes: u64,
}

/// Wraps a router in the request pipeline.
#[derive(Clone)]
pub struct Pipeline {
    state: PipelineState,
}

impl Pipeline {
    pub fn new(resolver: TrustResolver, telemetry: Arc<dyn Telemetry>, max_request_bytes: u64) -> Self {
        install_panic_hook();
        Self {
            state: PipelineState {
                resolver: Arc::new(resolver),
                telemetry,
                max_request_bytes,
            },
        }
    }

    /// Apply every stage to `router`. Layers added last run first.
    pub fn layer(&self, router: Router) -> Router {
        router
            .layer(from_fn_with_state(
                self.state.clone(),
                request_context::request_context_middleware,
            ))
            .layer(from_fn_with_state(
                self.state.clone(),
                trace_context::trace_context_middleware,
            ))
            .layer(from_fn_with_state(
                self.state.clone(),
                trust_proxy::trust_proxy_middleware,
            ))
            .layer(from_fn(recovery::recovery_middleware))
    }
}
