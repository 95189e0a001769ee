//! Runtime options of one middleware instance.
//!
//! `ProxyOptions` is built once and shared read-only by every request. A
//! request never mutates it; it gets a `ForwardOptions` snapshot instead,
//! which carries the (possibly overridden) target next to the shared
//! options.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::response;
use axum::response::Response;
use url::Url;

use crate::error::{ConfigError, ForwardError};
use crate::http::handlers::ProxyEvents;
use crate::http::intercept::ProxyBody;
use crate::routing::{PathRewriteConfig, RouteTable};

/// Immutable configuration of a middleware instance.
#[derive(Clone)]
pub struct ProxyOptions {
    /// Upstream base URL.
    pub target: Url,
    pub change_origin: bool,
    /// Intercept websocket upgrades.
    pub ws: bool,
    pub ws_debounce: Duration,
    pub path_rewrite: Option<PathRewriteConfig>,
    pub router: Option<RouteTable>,
    pub proxy_body: ProxyBody,
    pub events: ProxyEvents,

    // Forwarded untouched to the forwarding engine.
    pub headers: HeaderMap,
    pub xfwd: bool,
    pub prepend_path: bool,
    pub ignore_path: bool,
    pub proxy_timeout: Option<Duration>,
}

impl ProxyOptions {
    pub fn builder() -> ProxyOptionsBuilder {
        ProxyOptionsBuilder::default()
    }
}

impl fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("target", &self.target.as_str())
            .field("change_origin", &self.change_origin)
            .field("ws", &self.ws)
            .field("path_rewrite", &self.path_rewrite)
            .field("router", &self.router)
            .field("proxy_body", &self.proxy_body)
            .field("headers", &self.headers)
            .field("xfwd", &self.xfwd)
            .field("prepend_path", &self.prepend_path)
            .field("ignore_path", &self.ignore_path)
            .field("proxy_timeout", &self.proxy_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for `ProxyOptions`. `build` fails fast on bad configuration.
pub struct ProxyOptionsBuilder {
    target: Option<String>,
    change_origin: bool,
    ws: bool,
    ws_debounce: Duration,
    path_rewrite: Option<PathRewriteConfig>,
    router: Option<RouteTable>,
    proxy_body: ProxyBody,
    events: ProxyEvents,
    headers: Vec<(String, String)>,
    xfwd: bool,
    prepend_path: bool,
    ignore_path: bool,
    proxy_timeout: Option<Duration>,
}

impl Default for ProxyOptionsBuilder {
    fn default() -> Self {
        Self {
            target: None,
            change_origin: false,
            ws: false,
            ws_debounce: Duration::ZERO,
            path_rewrite: None,
            router: None,
            proxy_body: ProxyBody::Disabled,
            events: ProxyEvents::default(),
            headers: Vec::new(),
            xfwd: false,
            prepend_path: true,
            ignore_path: false,
            proxy_timeout: None,
        }
    }
}

impl ProxyOptionsBuilder {
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn change_origin(mut self, enabled: bool) -> Self {
        self.change_origin = enabled;
        self
    }

    pub fn ws(mut self, enabled: bool) -> Self {
        self.ws = enabled;
        self
    }

    pub fn ws_debounce(mut self, window: Duration) -> Self {
        self.ws_debounce = window;
        self
    }

    pub fn path_rewrite(mut self, config: PathRewriteConfig) -> Self {
        self.path_rewrite = Some(config);
        self
    }

    pub fn router(mut self, table: RouteTable) -> Self {
        self.router = Some(table);
        self
    }

    pub fn proxy_body(mut self, mode: ProxyBody) -> Self {
        self.proxy_body = mode;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn xfwd(mut self, enabled: bool) -> Self {
        self.xfwd = enabled;
        self
    }

    pub fn prepend_path(mut self, enabled: bool) -> Self {
        self.prepend_path = enabled;
        self
    }

    pub fn ignore_path(mut self, enabled: bool) -> Self {
        self.ignore_path = enabled;
        self
    }

    pub fn proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = Some(timeout);
        self
    }

    /// Replace the default error policy.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ForwardError, &Parts) -> Response + Send + Sync + 'static,
    {
        self.events.on_error = Arc::new(f);
        self
    }

    /// Inspect or modify the outgoing request head.
    pub fn on_proxy_req<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Parts) + Send + Sync + 'static,
    {
        self.events.on_proxy_req = Some(Arc::new(f));
        self
    }

    /// Inspect or modify the outgoing upgrade request head.
    pub fn on_proxy_req_ws<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Parts) + Send + Sync + 'static,
    {
        self.events.on_proxy_req_ws = Some(Arc::new(f));
        self
    }

    /// Inspect or modify the upstream response head.
    pub fn on_proxy_res<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut response::Parts, &Parts) + Send + Sync + 'static,
    {
        self.events.on_proxy_res = Some(Arc::new(f));
        self
    }

    /// Called when an upgraded tunnel is established.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts) + Send + Sync + 'static,
    {
        self.events.on_open = Some(Arc::new(f));
        self
    }

    /// Called when an upgraded tunnel closes.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts) + Send + Sync + 'static,
    {
        self.events.on_close = Arc::new(f);
        self
    }

    pub fn build(self) -> Result<ProxyOptions, ConfigError> {
        let raw_target = self.target.ok_or(ConfigError::MissingTarget)?;
        let target = Url::parse(&raw_target).map_err(|e| ConfigError::InvalidTarget {
            target: raw_target.clone(),
            message: e.to_string(),
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(&value).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        Ok(ProxyOptions {
            target,
            change_origin: self.change_origin,
            ws: self.ws,
            ws_debounce: self.ws_debounce,
            path_rewrite: self.path_rewrite,
            router: self.router,
            proxy_body: self.proxy_body,
            events: self.events,
            headers,
            xfwd: self.xfwd,
            prepend_path: self.prepend_path,
            ignore_path: self.ignore_path,
            proxy_timeout: self.proxy_timeout,
        })
    }
}

/// Per-request snapshot: the effective target plus the shared options.
#[derive(Clone)]
pub struct ForwardOptions {
    /// Effective upstream for this request (router override or configured target).
    pub target: Url,
    shared: Arc<ProxyOptions>,
}

impl ForwardOptions {
    pub fn new(target: Url, shared: Arc<ProxyOptions>) -> Self {
        Self { target, shared }
    }

    /// Snapshot that keeps the configured target.
    pub fn from_shared(shared: Arc<ProxyOptions>) -> Self {
        Self {
            target: shared.target.clone(),
            shared,
        }
    }
}

impl Deref for ForwardOptions {
    type Target = ProxyOptions;

    fn deref(&self) -> &ProxyOptions {
        &self.shared
    }
}

impl fmt::Debug for ForwardOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardOptions")
            .field("target", &self.target.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_required() {
        assert!(matches!(ProxyOptions::builder().build(), Err(ConfigError::MissingTarget)));
    }

    #[test]
    fn test_invalid_target() {
        let err = ProxyOptions::builder().target("localhost without scheme").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { .. }));
    }

    #[test]
    fn test_invalid_header() {
        let err = ProxyOptions::builder()
            .target("http://localhost:4000")
            .header("bad header", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader { .. }));
    }

    #[test]
    fn test_snapshot_overrides_target_without_touching_shared_options() {
        let shared = Arc::new(
            ProxyOptions::builder()
                .target("http://localhost:4000")
                .change_origin(true)
                .build()
                .unwrap(),
        );
        let snapshot = ForwardOptions::new(Url::parse("http://10.0.0.2").unwrap(), shared.clone());

        assert_eq!(snapshot.target.as_str(), "http://10.0.0.2/");
        assert!(snapshot.change_origin);
        assert_eq!(shared.target.as_str(), "http://localhost:4000/");
        assert_eq!(ForwardOptions::from_shared(shared).target.as_str(), "http://localhost:4000/");
    }
}
