//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → trust.rs (is the TCP peer a trusted proxy?)
//!     → headers.rs (which forwarding headers may override the origin)
//!     → Pass to request context
//! ```
//!
//! # Design Decisions
//! - Default deny: only peers inside a trusted prefix may rewrite origin
//! - Trust is decided from the transport address, never from a header
//! - The trusted prefix set is built once and shared read-only

pub mod headers;
pub mod trust;

pub use headers::ProxyHeaderPolicy;
pub use trust::{Resolution, TrustError, TrustResolver, TrustedPrefixSet};
