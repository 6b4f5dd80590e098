//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (one JSON object per event on stdout)
//!     → tracing.rs (trace context per request, OTLP span export, teardown)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Distributed tracing (optional, W3C Trace Context, OTLP/HTTP)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID and trace ID ride on the request span, so every event
//!   emitted while handling a request carries them
//! - Telemetry is optional and disabled by default

pub mod logging;
pub mod tracing;

pub use self::logging::{init_logging, new_logger, JsonLayer};
pub use self::tracing::{setup_telemetry, OtelTelemetry, Telemetry, TelemetryError, TraceContext};
