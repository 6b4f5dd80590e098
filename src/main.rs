//! gatehouse service binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::listener ─▶ recovery ─▶ trust_proxy ─▶ trace_context
//!                                                                     │
//!                                                                     ▼
//!     Client Response                                          request_context
//!     ◀────────────── counting body ◀── completion record ◀──── handler
//!
//!     config ─▶ observability ─▶ lifecycle (start, signals, shutdown deadline)
//! ```

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    gatehouse::lifecycle::startup::run().await
}
