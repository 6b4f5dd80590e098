//! HTTP service foundation: trusted-proxy resolution, request correlation,
//! structured request logging, panic recovery and graceful shutdown.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::Settings;
pub use http::HttpServer;
pub use lifecycle::{Coordinator, Shutdown};
