//! Instrumented request and response bodies.
//!
//! # Responsibilities
//! - Count bytes read from the request body, enforce the size limit
//! - Count bytes written to the response body
//! - Hand the per-request counters to the completion record
//!
//! # Design Decisions
//! - Counts what actually crossed the wrapper, not what was asked for
//! - Errors from the wrapped body are forwarded untouched
//! - Trailers and size hints pass through; only data frames are counted

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::StatusCode;
use hyper::body::{Body, Frame, SizeHint};
use thiserror::Error;

use crate::http::response::CompletionGuard;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body errors raised by the wrapper itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
}

/// Counters for a single in-flight request.
///
/// Shared between the request body, the response body and the completion
/// record of one request. Counters only ever grow.
#[derive(Debug)]
pub struct RequestMetrics {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    status: AtomicU16,
    payload_too_large: AtomicBool,
    start: Instant,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(start: Instant) -> Self {
        Self {
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            status: AtomicU16::new(StatusCode::OK.as_u16()),
            payload_too_large: AtomicBool::new(false),
            start,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Final status, 200 unless something set it.
    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the request body tripped the size limit.
    pub fn payload_too_large(&self) -> bool {
        self.payload_too_large.load(Ordering::Relaxed)
    }

    pub(crate) fn set_status(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::Relaxed);
    }

    fn add_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    fn add_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Request body that counts bytes and enforces an upper bound.
///
/// A data frame that would push the total past `limit` is not delivered;
/// the read fails with [`BodyError::PayloadTooLarge`] and the counter keeps
/// only the bytes delivered before it.
pub struct CountingBody<B> {
    inner: B,
    metrics: Arc<RequestMetrics>,
    limit: u64,
    exceeded: bool,
}

impl<B> CountingBody<B> {
    pub fn new(inner: B, metrics: Arc<RequestMetrics>, limit: u64) -> Self {
        Self {
            inner,
            metrics,
            limit,
            exceeded: false,
        }
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.exceeded {
            return Poll::Ready(None);
        }

        let frame = match ready!(Pin::new(&mut self.inner).poll_frame(cx)) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
            None => return Poll::Ready(None),
        };

        if let Some(data) = frame.data_ref() {
            let len = data.len() as u64;
            if self.metrics.bytes_read().saturating_add(len) > self.limit {
                self.exceeded = true;
                self.metrics.payload_too_large.store(true, Ordering::Relaxed);
                let limit = self.limit;
                return Poll::Ready(Some(Err(BodyError::PayloadTooLarge { limit }.into())));
            }
            self.metrics.add_read(len);
        }
        Poll::Ready(Some(Ok(frame)))
    }

    fn is_end_stream(&self) -> bool {
        self.exceeded || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Response body that counts bytes written and emits the completion
/// record once the body is finished or dropped.
pub struct CountingResponseBody<B> {
    inner: B,
    metrics: Arc<RequestMetrics>,
    completion: Option<CompletionGuard>,
}

impl<B> CountingResponseBody<B> {
    pub fn new(inner: B, metrics: Arc<RequestMetrics>, completion: CompletionGuard) -> Self {
        Self {
            inner,
            metrics,
            completion: Some(completion),
        }
    }
}

impl<B> Body for CountingResponseBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = ready!(Pin::new(&mut self.inner).poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    self.metrics.add_written(data.len() as u64);
                }
            }
            // Finished or failed: the record goes out now.
            Some(Err(_)) | None => drop(self.completion.take()),
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Whether `err` (or anything in its source chain) is a payload limit error.
pub fn is_payload_too_large(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<BodyError>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}
