//! Configuration schema definitions.
//!
//! The settings object handed to every subsystem after startup. Values are
//! already parsed and validated; nothing here touches the environment.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use url::Url;

/// Root settings for the service.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// TCP port to listen on (all interfaces).
    pub port: u16,

    /// Path answered by the liveness probe.
    pub health_endpoint: String,

    /// Minimum level written by the logger.
    pub log_level: LogLevel,

    /// Upper bound on graceful shutdown, applied to connection draining
    /// and to telemetry teardown.
    #[serde(serialize_with = "serialize_duration")]
    pub shutdown_timeout: Duration,

    /// Service name reported to telemetry.
    pub service_name: String,

    /// Service version reported to telemetry.
    pub service_version: String,

    /// Enable trace context propagation.
    pub otel_enabled: bool,

    /// Collector endpoint for the trace exporter.
    pub otel_exporter_otlp_endpoint: Option<Url>,

    /// Maximum request body size in bytes.
    pub max_allowed_request_bytes: u64,
}

impl Settings {
    /// Address the listener binds to.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3000,
            health_endpoint: "/health".to_string(),
            log_level: LogLevel::Info,
            shutdown_timeout: Duration::from_secs(15),
            service_name: "gatehouse".to_string(),
            service_version: "v1.0.0".to_string(),
            otel_enabled: false,
            otel_exporter_otlp_endpoint: None,
            max_allowed_request_bytes: 10 * 1000 * 1000,
        }
    }
}

fn serialize_duration<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:?}", d))
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
