//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the service routes
//! - Wrap it in the request pipeline
//! - Run the accept loop, one task per connection
//! - Stop accepting on shutdown and drain open connections
//!
//! # Design Decisions
//! - The drain itself has no deadline; the lifecycle coordinator bounds it
//!   by aborting the server task, which drops every connection task
//! - Accept errors that only concern one connection are logged and skipped

use std::sync::Arc;

use axum::{
    body::Body,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tokio::task::JoinSet;

use crate::config::Settings;
use crate::http::body::is_payload_too_large;
use crate::http::middleware::Pipeline;
use crate::http::request::RequestContext;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{serve_connection, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::observability::Telemetry;
use crate::security::TrustResolver;

/// HTTP server for the service.
pub struct HttpServer {
    router: Router,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given settings.
    pub fn new(settings: &Settings, resolver: TrustResolver, telemetry: Arc<dyn Telemetry>) -> Self {
        let pipeline = Pipeline::new(resolver, telemetry, settings.max_allowed_request_bytes);
        let router = pipeline.layer(Self::build_routes(settings));
        Self {
            router,
            tracker: ConnectionTracker::new(),
        }
    }

    fn build_routes(settings: &Settings) -> Router {
        Router::new()
            .route(&settings.health_endpoint, get(health_handler))
            .route("/hi", get(hi_handler))
            .route("/echo", post(echo_handler))
    }

    /// Tracker of the connections this server has open.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// The fully layered router, for in-process use.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until `shutdown` fires and every connection is done.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut connections = JoinSet::new();
        let result = loop {
            tokio::select! {
                _ = shutdown.triggered() => break Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => break Err(e),
                    };
                    let guard = self.tracker.track();
                    let router = self.router.clone();
                    let signal = shutdown.clone();
                    connections.spawn(async move {
                        tracing::trace!(connection_id = %guard.id(), peer = %peer, "Connection opened");
                        serve_connection(stream, peer, router, signal).await;
                        drop(guard);
                    });
                }
                // Reap finished connection tasks as we go.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        drop(listener);
        tracing::info!(
            open_connections = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        while connections.join_next().await.is_some() {}

        tracing::info!("HTTP server stopped");
        result
    }
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn hi_handler(ctx: RequestContext) -> &'static str {
    ctx.span().in_scope(|| tracing::info!("hi"));
    "hi"
}

async fn echo_handler(body: Body) -> Result<Body, StatusCode> {
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => Ok(Body::from(bytes)),
        Err(e) if is_payload_too_large(&e) => Err(StatusCode::PAYLOAD_TOO_LARGE),
        Err(_) => Err(StatusCode::BAD_REQUEST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::extract::ConnectInfo;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::observability::tracing::NoopTelemetry;

    fn router(settings: &Settings) -> Router {
        HttpServer::new(settings, TrustResolver::default(), Arc::new(NoopTelemetry)).into_router()
    }

    fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
        let mut req = Request::builder().method(method).uri(uri).body(body).unwrap();
        let peer: SocketAddr = "198.51.100.1:4000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        req
    }

    #[tokio::test]
    async fn health_endpoint_follows_settings() {
        let settings = Settings {
            health_endpoint: "/livez".to_string(),
            ..Settings::default()
        };
        let app = router(&settings);

        let response = app.clone().oneshot(request("GET", "/livez", Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request("GET", "/health", Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn echo_rejects_oversized_body() {
        let settings = Settings {
            max_allowed_request_bytes: 4,
            ..Settings::default()
        };
        let response = router(&settings)
            .oneshot(request("POST", "/echo", Body::from("0123456789")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_route_still_gets_request_id() {
        let response = router(&Settings::default())
            .oneshot(request("GET", "/nowhere", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
