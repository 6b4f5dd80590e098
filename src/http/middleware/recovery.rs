//! Recovery stage.
//!
//! Outermost stage of the pipeline. A panic anywhere below it is caught,
//! logged with the request's identity, its completion fields and a stack
//! capture, and answered with a 500. The panic never reaches the
//! connection task.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once, OnceLock};
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;

use crate::http::body::RequestMetrics;
use crate::http::request::RequestIdentity;
use crate::http::response::{internal_server_error, RequestSummary};

/// What the context builder learned about a request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub identity: RequestIdentity,
    pub summary: RequestSummary,
    pub metrics: Arc<RequestMetrics>,
}

/// Filled by the context builder so a panic record can be attributed.
#[derive(Debug, Clone, Default)]
pub struct ContextSlot(Arc<OnceLock<RequestRecord>>);

impl ContextSlot {
    pub fn fill(&self, record: RequestRecord) {
        let _ = self.0.set(record);
    }

    pub fn get(&self) -> Option<&RequestRecord> {
        self.0.get()
    }
}

/// What was captured about a caught panic.
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub message: String,
    pub location: String,
    pub stack: String,
}

impl PanicReport {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        let (location, stack) = match LAST_PANIC.with(|slot| slot.borrow_mut().take()) {
            Some(capture) => (capture.location, capture.stack),
            None => (String::new(), Backtrace::force_capture().to_string()),
        };
        Self {
            message,
            location,
            stack,
        }
    }
}

struct PanicCapture {
    location: String,
    stack: String,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicCapture>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static RECOVERING: ();
}

static PANIC_HOOK: Once = Once::new();

/// Install the process panic hook used to capture stacks.
///
/// Panics raised while a guarded request is being polled are recorded for
/// the recovery stage instead of being printed; every other panic goes to
/// the previously installed hook.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if RECOVERING.try_with(|_| ()).is_err() {
                previous(info);
                return;
            }
            let capture = PanicCapture {
                location: info.location().map(|l| l.to_string()).unwrap_or_default(),
                stack: Backtrace::force_capture().to_string(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(capture));
        }));
    });
}

/// Run `fut`, turning a panic into `Err(PanicReport)`.
pub async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, PanicReport> {
    RECOVERING
        .scope((), AssertUnwindSafe(fut).catch_unwind())
        .await
        .map_err(PanicReport::from_payload)
}

pub async fn recovery_middleware(mut req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let slot = ContextSlot::default();
    req.extensions_mut().insert(slot.clone());
    // Fallbacks for a panic before the context builder ran.
    let transport = RequestSummary {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        client_addr: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default(),
        scheme: String::new(),
    };

    let report = match catch_panic(next.run(req)).await {
        Ok(response) => return response,
        Err(report) => report,
    };

    let duration = start.elapsed().as_nanos() as u64;
    match slot.get() {
        Some(record) => tracing::error!(
            reqId = %record.identity.request_id,
            traceId = %record.identity.trace_id,
            method = %record.summary.method,
            path = %record.summary.path,
            ua = %record.summary.user_agent,
            ip = %record.summary.client_addr,
            scheme = %record.summary.scheme,
            bw = record.metrics.bytes_written(),
            br = record.metrics.bytes_read(),
            status = 500u16,
            duration,
            panic = %report.message,
            location = %report.location,
            stack = %report.stack,
            "Request panicked"
        ),
        None => tracing::error!(
            method = %transport.method,
            path = %transport.path,
            ua = %transport.user_agent,
            ip = %transport.client_addr,
            bw = 0u64,
            br = 0u64,
            status = 500u16,
            duration,
            panic = %report.message,
            location = %report.location,
            stack = %report.stack,
            "Request panicked"
        ),
    }

    internal_server_error()
}
