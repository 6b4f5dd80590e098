//! Server lifecycle coordination.
//!
//! # Responsibilities
//! - Bind the listener and run the server on its own task
//! - Surface fatal server failures while serving
//! - Shut down within a deadline: stop accepting, drain, force-close
//! - Tear telemetry down once the server is gone
//!
//! # States
//! ```text
//! Starting → Serving → ShuttingDown → Stopped
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::{Telemetry, TelemetryError};

/// Where the service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Serving,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
    #[error("server stopped without being asked to")]
    UnexpectedExit,
    #[error("shutdown deadline of {deadline:?} exceeded, force-closed {open_connections} connections")]
    DrainTimeout {
        deadline: Duration,
        open_connections: u64,
    },
    #[error("telemetry teardown exceeded {0:?}")]
    TelemetryTimeout(Duration),
    #[error("telemetry teardown: {0}")]
    Telemetry(#[from] TelemetryError),
}

type ServerTask = JoinHandle<Result<(), ListenerError>>;

/// Owns the server task and the shutdown token.
pub struct Coordinator {
    state: watch::Sender<LifecycleState>,
    shutdown: Shutdown,
    telemetry: Arc<dyn Telemetry>,
    server: Option<ServerTask>,
    tracker: ConnectionTracker,
    local_addr: Option<SocketAddr>,
}

impl Coordinator {
    pub fn new(telemetry: Arc<dyn Telemetry>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            state,
            shutdown: Shutdown::new(),
            telemetry,
            server: None,
            tracker: ConnectionTracker::new(),
            local_addr: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Open connections of the running server.
    pub fn open_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Bind `addr` and start serving on a background task.
    pub async fn start(&mut self, addr: SocketAddr, server: HttpServer) -> Result<SocketAddr, LifecycleError> {
        let listener = Listener::bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        self.tracker = server.tracker();
        let signal = self.shutdown.subscribe();
        self.server = Some(tokio::spawn(server.run(listener, signal)));
        self.local_addr = Some(local_addr);
        self.state.send_replace(LifecycleState::Serving);

        tracing::info!("Listening for HTTP on port {}", local_addr.port());
        Ok(local_addr)
    }

    /// Resolve when the server task ends on its own, which is always fatal.
    ///
    /// Never resolves if the server is not running. Cancel-safe.
    pub async fn failed(&mut self) -> LifecycleError {
        let Some(handle) = self.server.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.server = None;
        self.state.send_replace(LifecycleState::Stopped);

        match result {
            Ok(Ok(())) => LifecycleError::UnexpectedExit,
            Ok(Err(e)) => e.into(),
            Err(e) => e.into(),
        }
    }

    /// Stop accepting, drain open connections for up to `deadline`, then
    /// tear telemetry down with the same deadline.
    ///
    /// Connections still open at the deadline are force-closed and the
    /// drain is reported as [`LifecycleError::DrainTimeout`]. Teardown runs
    /// either way. The first failure is returned, any later one is logged.
    pub async fn shutdown(&mut self, deadline: Duration) -> Result<(), LifecycleError> {
        self.state.send_replace(LifecycleState::ShuttingDown);
        self.shutdown.trigger();

        let drained = match self.server.take() {
            Some(handle) => self.drain(handle, deadline).await,
            None => Ok(()),
        };
        self.state.send_replace(LifecycleState::Stopped);
        match &drained {
            Ok(()) => tracing::info!("Server stopped"),
            Err(e) => tracing::error!(err = %e, "Server shutdown"),
        }

        let teardown = match tokio::time::timeout(deadline, self.telemetry.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LifecycleError::Telemetry(e)),
            Err(_) => Err(LifecycleError::TelemetryTimeout(deadline)),
        };
        if let Err(e) = &teardown {
            tracing::error!(err = %e, "Telemetry shutdown");
        }

        drained.and(teardown)
    }

    async fn drain(&self, mut handle: ServerTask, deadline: Duration) -> Result<(), LifecycleError> {
        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(result)) => result.map_err(LifecycleError::from),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                let open_connections = self.tracker.active_count();
                // Aborting the server drops its connection tasks with it.
                handle.abort();
                let _ = handle.await;
                Err(LifecycleError::DrainTimeout {
                    deadline,
                    open_connections,
                })
            }
        }
    }
}
