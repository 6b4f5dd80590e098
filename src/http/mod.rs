//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, routes, accept loop)
//!     → middleware/ (recovery, trust resolution, trace context, request context)
//!     → request.rs (request ID, request span, typed context)
//!     → body.rs (counting request and response bodies)
//!     → response.rs (completion record)
//!     → Send to client
//! ```

pub mod body;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{Pipeline, PipelineState};
pub use request::{Origin, RequestContext, RequestIdentity, X_REQUEST_ID};
pub use server::HttpServer;
