//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Logging → Telemetry → Bind listener → Serve
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (coordinator.rs, shutdown.rs):
//!     Trigger token → Stop accept → Drain (deadline) → Force-close → Telemetry teardown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then listeners
//! - Shutdown has a deadline: leftovers are force-closed and reported

pub mod coordinator;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use coordinator::{Coordinator, LifecycleError, LifecycleState};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{await_termination, TerminationSignal};
