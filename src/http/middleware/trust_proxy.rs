//! Trust resolution stage.
//!
//! Rewrites the perceived origin of requests arriving through a trusted
//! proxy and records it as an [`Origin`] extension.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::PipelineState;
use crate::http::request::Origin;
use crate::http::response::error_response;

pub async fn trust_proxy_middleware(
    State(state): State<PipelineState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let resolution = match state.resolver.resolve(&peer, req.headers()) {
        Ok(resolution) => resolution,
        Err(err) => {
            tracing::error!(
                ip = %peer,
                method = %req.method(),
                path = %req.uri().path(),
                status = StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                duration = start.elapsed().as_nanos() as u64,
                "{}",
                err
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    if let Some(host) = &resolution.host {
        match HeaderValue::from_str(host) {
            Ok(value) => {
                req.headers_mut().insert(header::HOST, value);
            }
            Err(_) => tracing::debug!(host = %host, "Ignoring unrepresentable forwarded host"),
        }
    }

    let host = resolution.host.clone().or_else(|| {
        req.headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
    });
    let scheme = resolution
        .scheme
        .clone()
        .or_else(|| req.uri().scheme_str().map(str::to_string));

    let origin = Origin {
        client_addr: resolution.effective_peer(&peer).to_string(),
        host,
        scheme,
    };
    req.extensions_mut().insert(origin);

    next.run(req).await
}
