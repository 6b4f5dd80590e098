//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment
//!     → loader.rs (read every variable, collect every failure)
//!     → validation.rs (per-value parsers and semantic checks)
//!     → Settings (validated, immutable)
//!     → passed by reference to every subsystem
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; there is no reload path
//! - All fields have defaults so an empty environment is a valid config
//! - Every misconfigured variable is reported at once, not just the first

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{LogLevel, Settings};
pub use validation::ValidationError;
