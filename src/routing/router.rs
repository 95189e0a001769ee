//! Per-request target override.
//!
//! # Responsibilities
//! - Resolve an override target from a static host/path table or a
//!   user-supplied function
//! - Report "no override" explicitly so the configured target is kept
//!
//! # Design Decisions
//! - Table targets are parsed once, at construction
//! - Keys containing `/` match `host + path` by substring; other keys
//!   match `host` exactly
//! - Insertion order, first match wins

use std::fmt;
use std::sync::Arc;

use axum::http::header::HOST;
use axum::http::request::Parts;
use url::Url;

use crate::error::{ConfigError, ForwardError, ForwardErrorKind};
use crate::observability::metrics;

/// Dynamic router. `None` keeps the configured target.
pub type RouterFn = Arc<dyn Fn(&Parts) -> Option<String> + Send + Sync>;

/// Raw `router` configuration.
#[derive(Clone)]
pub enum RouteTable {
    /// `(host or host+path, target)` entries in insertion order.
    Static(Vec<(String, String)>),
    Dynamic(RouterFn),
}

impl RouteTable {
    pub fn table<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        RouteTable::Static(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Parts) -> Option<String> + Send + Sync + 'static,
    {
        RouteTable::Dynamic(Arc::new(f))
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTable::Static(entries) => f.debug_tuple("Static").field(entries).finish(),
            RouteTable::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[derive(Clone)]
enum Resolver {
    Table(Vec<(String, Url)>),
    Dynamic(RouterFn),
}

/// Compiled router.
#[derive(Clone)]
pub struct Router {
    resolver: Resolver,
}

impl Router {
    /// Compile a route table. Unparsable table targets are rejected here.
    pub fn new(table: RouteTable) -> Result<Self, ConfigError> {
        let resolver = match table {
            RouteTable::Static(entries) => {
                let compiled = entries
                    .into_iter()
                    .map(|(key, target)| {
                        let url = Url::parse(&target).map_err(|e| ConfigError::InvalidRouterTarget {
                            key: key.clone(),
                            target: target.clone(),
                            message: e.to_string(),
                        })?;
                        Ok((key, url))
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                Resolver::Table(compiled)
            }
            RouteTable::Dynamic(f) => Resolver::Dynamic(f),
        };
        Ok(Self { resolver })
    }

    /// Compile the router if one is configured.
    pub fn from_options(table: Option<RouteTable>) -> Result<Option<Self>, ConfigError> {
        table.map(Router::new).transpose()
    }

    /// Resolve the override target for a request, if any.
    ///
    /// The request URI must be the original, not-yet-rewritten one.
    pub fn get_target(&self, request: &Parts) -> Result<Option<Url>, ForwardError> {
        let target = match &self.resolver {
            Resolver::Table(entries) => target_from_table(request, entries),
            Resolver::Dynamic(f) => match f(request) {
                Some(raw) => Some(Url::parse(&raw).map_err(|e| {
                    ForwardError::new(
                        ForwardErrorKind::InvalidTarget,
                        format!("router returned invalid target '{}': {}", raw, e),
                    )
                })?),
                None => None,
            },
        };

        if target.is_some() {
            metrics::record_router_override();
        }
        Ok(target)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resolver {
            Resolver::Table(entries) => f
                .debug_struct("Router")
                .field("table", &entries.iter().map(|(k, _)| k).collect::<Vec<_>>())
                .finish(),
            Resolver::Dynamic(_) => f.write_str("Router { dynamic }"),
        }
    }
}

fn target_from_table(request: &Parts, entries: &[(String, Url)]) -> Option<Url> {
    let host = request_host(request);
    let path = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let host_and_path = format!("{}{}", host, path);

    for (key, target) in entries {
        let hit = if key.contains('/') {
            host_and_path.contains(key.as_str())
        } else {
            key == host
        };

        if hit {
            tracing::debug!(key = %key, target = %target, "Router table match");
            return Some(target.clone());
        }
    }
    None
}

/// Host the client addressed: `Host` header, else the URI authority.
pub fn request_host(request: &Parts) -> &str {
    request
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri.authority().map(|a| a.as_str()))
        .unwrap_or("")
}
