//! Routing decisions.
//!
//! # Data Flow
//! ```text
//! Incoming request (original URL, host, headers)
//!     → matcher.rs (is the request in scope?)
//!     → router.rs (override target, sees the ORIGINAL path)
//!     → rewrite.rs (rewritten path)
//!     → Return: effective target + path for the forwarder
//!
//! Compilation (at middleware construction):
//!     context patterns → glob.rs → anchored regexes
//!     pathRewrite rules → compiled regexes, declaration order
//!     router table → parsed target URLs, insertion order
//! ```
//!
//! # Design Decisions
//! - Everything compiled once, immutable at runtime
//! - Deterministic: same input always yields the same decision
//! - First match wins everywhere

pub mod glob;
pub mod matcher;
pub mod rewrite;
pub mod router;

pub use matcher::{ContextMatcher, MatchContext};
pub use rewrite::{PathRewriteConfig, PathRewriter};
pub use router::{RouteTable, Router};
