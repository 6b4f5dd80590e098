//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, per-connection error recovery)
//!     → connection.rs (lifecycle tracking, HTTP/1.1 + HTTP/2 serving)
//!     → Hand off to the HTTP router
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - The transport peer rides on every request as `ConnectInfo`

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
