//! Configuration schema definitions.
//!
//! This module defines the on-disk configuration structure. All types derive
//! Serde traits for deserialization from TOML. Function-valued options
//! (predicate contexts, custom rewrites, dynamic routers, body transforms)
//! have no file representation; they are set through `ProxyOptions::builder`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::options::ProxyOptions;
use crate::error::ConfigError;
use crate::http::intercept::ProxyBody;
use crate::routing::{MatchContext, PathRewriteConfig, RouteTable};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// The proxy middleware instance.
    pub proxy: MiddlewareConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Inbound request timeout (until the response head is ready) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// `context = "/api"` or `context = ["/api", "/ajax"]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ContextConfig {
    One(String),
    Many(Vec<String>),
}

/// One `[[proxy.path_rewrite]]` rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteRuleConfig {
    /// Regular expression matched against the request path.
    pub pattern: String,
    pub replacement: String,
}

/// One `[[proxy.router]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterEntryConfig {
    /// `host` or `host/path` fragment.
    pub key: String,
    pub target: String,
}

/// The `[proxy]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Scope of the proxy; everything when absent.
    pub context: Option<ContextConfig>,

    /// Upstream base URL. Required.
    pub target: Option<String>,

    /// Rewrite the Host header to the target's host.
    pub change_origin: bool,

    /// Proxy websocket upgrades.
    pub ws: bool,

    /// Trailing window used to coalesce upgrade notifications.
    pub ws_debounce_ms: u64,

    /// Capture JSON response bodies onto the call-context.
    pub proxy_body: bool,

    /// Static headers added to every outgoing request.
    pub headers: BTreeMap<String, String>,

    /// Add x-forwarded-* headers.
    pub xfwd: bool,

    /// Prepend the target's path to the proxied path.
    pub prepend_path: bool,

    /// Forward to the target's path only, dropping the incoming path.
    pub ignore_path: bool,

    /// Give up on the upstream after this many milliseconds without a response.
    pub proxy_timeout_ms: Option<u64>,

    /// Ordered path rewrite rules; first match wins.
    pub path_rewrite: Vec<RewriteRuleConfig>,

    /// Ordered router table; first match wins.
    pub router: Vec<RouterEntryConfig>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            context: None,
            target: None,
            change_origin: false,
            ws: false,
            ws_debounce_ms: 0,
            proxy_body: false,
            headers: BTreeMap::new(),
            xfwd: false,
            prepend_path: true,
            ignore_path: false,
            proxy_timeout_ms: None,
            path_rewrite: Vec::new(),
            router: Vec::new(),
        }
    }
}

impl MiddlewareConfig {
    /// Resolve the configured context into its tagged form.
    pub fn to_context(&self) -> Result<MatchContext, ConfigError> {
        match &self.context {
            None => Ok(MatchContext::default()),
            Some(ContextConfig::One(pattern)) => Ok(MatchContext::from_pattern(pattern.clone())),
            Some(ContextConfig::Many(patterns)) => MatchContext::from_patterns(patterns.clone()),
        }
    }

    /// Build the runtime options of the middleware.
    pub fn to_options(&self) -> Result<ProxyOptions, ConfigError> {
        let mut builder = ProxyOptions::builder()
            .change_origin(self.change_origin)
            .ws(self.ws)
            .ws_debounce(Duration::from_millis(self.ws_debounce_ms))
            .xfwd(self.xfwd)
            .prepend_path(self.prepend_path)
            .ignore_path(self.ignore_path);

        if let Some(target) = &self.target {
            builder = builder.target(target);
        }
        if let Some(ms) = self.proxy_timeout_ms {
            builder = builder.proxy_timeout(Duration::from_millis(ms));
        }
        if self.proxy_body {
            builder = builder.proxy_body(ProxyBody::Capture);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        if !self.path_rewrite.is_empty() {
            builder = builder.path_rewrite(PathRewriteConfig::rules(
                self.path_rewrite
                    .iter()
                    .map(|r| (r.pattern.clone(), r.replacement.clone())),
            ));
        }
        if !self.router.is_empty() {
            builder = builder.router(RouteTable::table(
                self.router.iter().map(|e| (e.key.clone(), e.target.clone())),
            ));
        }

        builder.build()
    }
}
