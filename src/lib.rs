//! Reverse-proxy middleware for axum.
//!
//! A `ProxyMiddleware` decides per request whether it is in scope, resolves
//! the effective upstream (router, then path rewrite) and forwards it.
//! Websocket upgrades are picked up from the hosting server once and
//! proxied the same way.
//!
//! ```text
//!  Client ──▶ HttpServer ──▶ ProxyMiddleware ──▶ Forwarder ──▶ Upstream
//!                 │               │
//!                 │               ├─ routing::ContextMatcher
//!                 │               ├─ routing::Router
//!                 │               ├─ routing::PathRewriter
//!                 │               └─ http::intercept (body → CallContext)
//!                 └─ UpgradeHub ──▶ UpgradeCoordinator (debounced)
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use config::{ForwardOptions, ProxyOptions};
pub use error::{ConfigError, ForwardError, ForwardErrorKind};
pub use http::{CallContext, HttpServer, ProxyBody, ProxyMiddleware};
pub use routing::{MatchContext, PathRewriteConfig, RouteTable};
