//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, upgrade dispatch, request ID, timeout)
//!     → middleware.rs (scope, router, rewrite, forward)
//!     → forward.rs (upstream request, upgrade tunnel)
//!     → intercept.rs (body capture onto context.rs)
//!     → Send to client
//!
//! Upgrade requests:
//!     → server.rs emits to upgrade.rs (UpgradeHub)
//!     → debounce.rs → middleware.rs → forward.rs
//! ```

pub mod context;
pub mod debounce;
pub mod forward;
pub mod handlers;
pub mod intercept;
pub mod middleware;
pub mod server;
pub mod upgrade;

pub use context::CallContext;
pub use forward::{Forwarder, HttpForwarder};
pub use handlers::{default_error_handler, ProxyEvents};
pub use intercept::ProxyBody;
pub use middleware::{proxy_middleware, ProxyMiddleware};
pub use server::HttpServer;
pub use upgrade::{UpgradeEvent, UpgradeHub, UpgradeSocket};
