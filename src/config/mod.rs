//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated)
//!     → schema.rs converts [proxy] into MatchContext + ProxyOptions
//!     → options.rs: ProxyOptions, immutable, shared via Arc
//!     → ForwardOptions snapshot per request
//! ```
//!
//! # Design Decisions
//! - Options are immutable once built; a request never mutates them
//! - All file fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod options;
pub mod schema;
pub mod validation;

pub use options::{ForwardOptions, ProxyOptions, ProxyOptionsBuilder};
pub use schema::{ListenerConfig, MiddlewareConfig, ObservabilityConfig, ProxyConfig};
