//! Startup and shutdown behaviour over real sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use gatehouse::config::Settings;
use gatehouse::http::HttpServer;
use gatehouse::lifecycle::{Coordinator, LifecycleError, LifecycleState};
use gatehouse::net::ListenerError;
use gatehouse::observability::tracing::NoopTelemetry;
use gatehouse::observability::{Telemetry, TelemetryError, TraceContext};
use gatehouse::security::TrustResolver;
use axum::http::HeaderMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

/// Telemetry whose teardown never finishes.
struct StuckTelemetry;

impl Telemetry for StuckTelemetry {
    fn span_context(&self, _headers: &HeaderMap) -> Option<TraceContext> {
        None
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), TelemetryError>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn serves_then_shuts_down_cleanly() {
    let (mut coordinator, addr) = common::start_server(&Settings::default(), Arc::new(NoopTelemetry)).await;
    assert_eq!(coordinator.state(), LifecycleState::Serving);

    let client = reqwest::Client::new();
    let response = client.get(format!("http://{addr}/hi")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "hi");

    let response = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    coordinator.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn in_flight_request_finishes_during_drain() {
    let (mut coordinator, addr) = common::start_server(&Settings::default(), Arc::new(NoopTelemetry)).await;

    let mut stream = common::start_slow_upload(addr, 10, "hello").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.open_connections(), 1);

    let shutdown = tokio::spawn(async move {
        let result = coordinator.shutdown(Duration::from_secs(5)).await;
        (result, coordinator.state())
    });

    // New connections are refused while the old one drains.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());

    stream.write_all(b"world").await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("helloworld"), "{response}");

    let (result, state) = shutdown.await.unwrap();
    result.unwrap();
    assert_eq!(state, LifecycleState::Stopped);
}

#[tokio::test]
async fn drain_deadline_force_closes_connections() {
    let (mut coordinator, addr) = common::start_server(&Settings::default(), Arc::new(NoopTelemetry)).await;

    let mut stream = common::start_slow_upload(addr, 1024, "partial").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let deadline = Duration::from_millis(300);
    let started = Instant::now();
    let err = coordinator.shutdown(deadline).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(err, LifecycleError::DrainTimeout { open_connections: 1, deadline: d } if d == deadline),
        "{err}"
    );
    assert!(elapsed >= deadline);
    assert!(elapsed < deadline + Duration::from_secs(2), "{elapsed:?}");
    assert_eq!(coordinator.state(), LifecycleState::Stopped);

    // The abandoned connection is closed from the server side.
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)), "{read:?}");
}

#[tokio::test]
async fn telemetry_teardown_is_bounded() {
    let (mut coordinator, _addr) = common::start_server(&Settings::default(), Arc::new(StuckTelemetry)).await;

    let deadline = Duration::from_millis(200);
    let started = Instant::now();
    let err = coordinator.shutdown(deadline).await.unwrap_err();

    assert!(matches!(err, LifecycleError::TelemetryTimeout(d) if d == deadline), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn bind_conflict_fails_start() {
    let (mut first, addr) = common::start_server(&Settings::default(), Arc::new(NoopTelemetry)).await;

    let telemetry: Arc<dyn Telemetry> = Arc::new(NoopTelemetry);
    let server = HttpServer::new(&Settings::default(), TrustResolver::default(), telemetry.clone());
    let mut second = Coordinator::new(telemetry);
    let err = second.start(addr, server).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Listener(ListenerError::Bind { .. })), "{err}");
    assert_eq!(second.state(), LifecycleState::Starting);

    first.shutdown(Duration::from_secs(1)).await.unwrap();
}
