//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Routing, middleware, forwarder and interceptor produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
