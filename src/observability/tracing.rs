//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract the caller's trace context from incoming requests
//! - Export request spans over OTLP
//! - Tear the telemetry pipeline down on shutdown
//!
//! # Design Decisions
//! - Optional: tracing disabled by default
//! - W3C Trace Context propagation (`traceparent`, `tracestate`)
//! - Request spans are `tracing` spans; `tracing-opentelemetry` turns them
//!   into OpenTelemetry spans, so the trace id in the logs is the one the
//!   collector receives

use std::sync::Arc;

use axum::http::HeaderMap;
use futures_util::future::{self, BoxFuture};
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{TraceContextExt, TraceId, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::Settings;

/// W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Errors from telemetry setup and teardown.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("unsupported exporter endpoint scheme {0:?}, expected http or https")]
    UnsupportedEndpoint(String),

    #[error("building span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("telemetry already shut down")]
    AlreadyShutdown,

    #[error("flushing spans: {0}")]
    Flush(OTelSdkError),

    #[error("telemetry teardown task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<OTelSdkError> for TelemetryError {
    fn from(err: OTelSdkError) -> Self {
        match err {
            OTelSdkError::AlreadyShutdown => Self::AlreadyShutdown,
            other => Self::Flush(other),
        }
    }
}

/// Reads propagation fields out of request headers.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// The caller's trace context, as extracted from the request headers.
///
/// Empty when the caller sent none; the request then starts a new trace.
#[derive(Debug, Clone, Default)]
pub struct TraceContext(Context);

impl TraceContext {
    /// Extract a W3C trace context from `headers`.
    pub fn extract(headers: &HeaderMap) -> Self {
        Self(TraceContextPropagator::new().extract(&HeaderExtractor(headers)))
    }

    /// Trace id sent by the caller, if any.
    pub fn remote_trace_id(&self) -> Option<TraceId> {
        let span_context = self.0.span().span_context().clone();
        span_context.is_valid().then(|| span_context.trace_id())
    }

    /// Make `span` a child of this context and return the trace id the
    /// request runs under.
    ///
    /// Falls back to the caller's trace id when no OpenTelemetry layer is
    /// installed on the current subscriber.
    pub fn attach(&self, span: &tracing::Span) -> Option<TraceId> {
        let _ = span.set_parent(self.0.clone());
        let local = span.context().span().span_context().trace_id();
        if local != TraceId::INVALID {
            Some(local)
        } else {
            self.remote_trace_id()
        }
    }
}

/// The telemetry collaborator as seen by the request pipeline and the
/// lifecycle coordinator.
pub trait Telemetry: Send + Sync {
    /// The trace context a request runs under, if telemetry is active.
    fn span_context(&self, headers: &HeaderMap) -> Option<TraceContext>;

    /// Tracer to bridge `tracing` spans into, if spans are exported.
    fn tracer(&self) -> Option<SdkTracer> {
        None
    }

    /// Flush and release the telemetry pipeline.
    fn shutdown(&self) -> BoxFuture<'_, Result<(), TelemetryError>>;
}

/// Telemetry that records nothing.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn span_context(&self, _headers: &HeaderMap) -> Option<TraceContext> {
        None
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), TelemetryError>> {
        Box::pin(future::ready(Ok(())))
    }
}

/// OpenTelemetry SDK pipeline: W3C propagation in, OTLP spans out.
pub struct OtelTelemetry {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl OtelTelemetry {
    /// Wrap an already configured tracer provider.
    pub fn with_provider(provider: SdkTracerProvider, service_name: impl Into<String>) -> Self {
        let tracer = provider.tracer(service_name.into());
        Self { provider, tracer }
    }

    /// Build the OTLP/HTTP pipeline described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, TelemetryError> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder().with_http();
        if let Some(endpoint) = &settings.otel_exporter_otlp_endpoint {
            if !matches!(endpoint.scheme(), "http" | "https") {
                return Err(TelemetryError::UnsupportedEndpoint(
                    endpoint.scheme().to_string(),
                ));
            }
            builder = builder.with_endpoint(traces_endpoint(endpoint));
        }
        let exporter = builder.build()?;

        let resource = Resource::builder()
            .with_service_name(settings.service_name.clone())
            .with_attribute(KeyValue::new(
                "service.version",
                settings.service_version.clone(),
            ))
            .build();

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        Ok(Self::with_provider(provider, settings.service_name.clone()))
    }
}

/// Signal path for a base collector URL, as the OTLP exporters derive it
/// from `OTEL_EXPORTER_OTLP_ENDPOINT`.
fn traces_endpoint(base: &url::Url) -> String {
    format!("{}/v1/traces", base.as_str().trim_end_matches('/'))
}

impl Telemetry for OtelTelemetry {
    fn span_context(&self, headers: &HeaderMap) -> Option<TraceContext> {
        Some(TraceContext::extract(headers))
    }

    fn tracer(&self) -> Option<SdkTracer> {
        Some(self.tracer.clone())
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), TelemetryError>> {
        let provider = self.provider.clone();
        Box::pin(async move {
            // The provider flushes its batch exporter synchronously.
            tokio::task::spawn_blocking(move || provider.shutdown()).await??;
            tracing::debug!("Telemetry shut down");
            Ok(())
        })
    }
}

/// Build the telemetry collaborator from settings.
pub fn setup_telemetry(settings: &Settings) -> Result<Arc<dyn Telemetry>, TelemetryError> {
    if !settings.otel_enabled {
        return Ok(Arc::new(NoopTelemetry));
    }
    Ok(Arc::new(OtelTelemetry::from_settings(settings)?))
}
