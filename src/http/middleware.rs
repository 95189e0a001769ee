//! The proxy middleware.
//!
//! # Responsibilities
//! - Decide per request whether it is in scope (`ContextMatcher`)
//! - Resolve the effective target (`Router`), then the path (`PathRewriter`)
//! - Hand the request to the `Forwarder` and return its response
//! - Subscribe once to the server's upgrade events and proxy upgrades
//!
//! # Data Flow
//! ```text
//! Request
//!     → attach to UpgradeHub (ws only, once)
//!     → ContextMatcher ── out of scope ──→ next stage
//!     → CallContext (response handled here)
//!     → Router (original path) → PathRewriter → ForwardOptions snapshot
//!     → Forwarder::forward_http
//!     → intercept body → next stage (head only, response discarded)
//!     → proxied response, or error handler response
//! ```
//!
//! # Design Decisions
//! - Router always runs before the rewrite, so it sees the original path
//! - Shared options are never mutated; each request gets a snapshot

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{OriginalUri, Request, State};
use axum::http::request::Parts;
use axum::http::uri::PathAndQuery;
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;
use futures_util::FutureExt;
use url::Url;

use crate::config::{ForwardOptions, ProxyOptions};
use crate::error::{ConfigError, ForwardError, ForwardErrorKind};
use crate::http::context::CallContext;
use crate::http::debounce::DispatchFn;
use crate::http::forward::{Forwarder, HttpForwarder};
use crate::http::intercept::intercept;
use crate::http::upgrade::{UpgradeCoordinator, UpgradeEvent, UpgradeHandler, UpgradeHub};
use crate::observability::metrics::{self, Outcome};
use crate::routing::router::request_host;
use crate::routing::{ContextMatcher, MatchContext, PathRewriter, Router};

/// A configured proxy middleware instance. Cheap to clone.
#[derive(Clone)]
pub struct ProxyMiddleware {
    inner: Arc<Inner>,
}

struct Inner {
    matcher: ContextMatcher,
    router: Option<Router>,
    rewriter: Option<PathRewriter>,
    options: Arc<ProxyOptions>,
    forwarder: Arc<dyn Forwarder>,
    coordinator: UpgradeCoordinator,
}

impl ProxyMiddleware {
    /// Build a middleware that forwards with the bundled HTTP engine.
    pub fn new(context: MatchContext, options: ProxyOptions) -> Result<Self, ConfigError> {
        Self::with_forwarder(context, options, Arc::new(HttpForwarder::new()))
    }

    pub fn with_forwarder(
        context: MatchContext,
        options: ProxyOptions,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self, ConfigError> {
        let description = format!("{:?}", context);
        let matcher = ContextMatcher::new(context)?;
        let router = Router::from_options(options.router.clone())?;
        let rewriter = PathRewriter::create(options.path_rewrite.clone())?;
        let options = Arc::new(options);

        tracing::info!(
            context = %description,
            target = %options.target,
            ws = options.ws,
            "Proxy created"
        );

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let dispatch: DispatchFn<UpgradeEvent> = Arc::new(move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_upgrade(event).await;
                    }
                }
                .boxed()
            });

            Inner {
                matcher,
                router,
                rewriter,
                coordinator: UpgradeCoordinator::new(options.ws_debounce, dispatch),
                options,
                forwarder,
            }
        });

        Ok(Self { inner })
    }

    /// Handle the current request, then continue with `next`.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let inner = &self.inner;

        if inner.options.ws {
            if let Some(hub) = request.extensions().get::<UpgradeHub>() {
                inner.coordinator.attach(hub);
            }
        }

        let original_uri = request
            .extensions()
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri.clone())
            .unwrap_or_else(|| request.uri().clone());

        let (mut parts, body) = request.into_parts();
        let start = Instant::now();

        if !inner.matcher.matches(&original_uri.to_string(), &parts) {
            metrics::record_request(Outcome::Skipped, start);
            return next.run(Request::from_parts(parts, body)).await;
        }

        let ctx = Arc::new(CallContext::new());
        ctx.respond_elsewhere();
        parts.uri = original_uri;

        let snapshot = match inner.prepare(&mut parts) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::record_request(Outcome::Failed, start);
                return inner.report(&e, &parts, &inner.options.target);
            }
        };

        let head = parts.clone();
        let response = match inner
            .forwarder
            .forward_http(Request::from_parts(parts, body), &snapshot)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                metrics::record_request(Outcome::Failed, start);
                return inner.report(&e, &head, &snapshot.target);
            }
        };

        let response = intercept(response, &snapshot.proxy_body, head.clone(), ctx.clone());
        let (response_head, response_body) = response.into_parts();
        ctx.set_proxy_response(response_head.clone());

        let mut downstream = Request::from_parts(head, Body::empty());
        downstream.extensions_mut().insert(ctx);
        let _ = next.run(downstream).await;

        metrics::record_request(Outcome::Proxied, start);
        Response::from_parts(response_head, response_body)
    }

    /// Subscribe to a server's upgrade events. No-op after the first call.
    pub fn attach(&self, hub: &UpgradeHub) -> bool {
        self.inner.coordinator.attach(hub)
    }

    /// Debounced upgrade handler, for wiring to a hub by hand.
    /// Events emitted outside a Tokio runtime are logged and dropped.
    pub fn upgrade_handler(&self) -> UpgradeHandler {
        self.inner.coordinator.handler()
    }

    pub fn upgrade(&self, event: UpgradeEvent) {
        self.inner.coordinator.trigger(event);
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.inner.options
    }

    pub fn coordinator(&self) -> &UpgradeCoordinator {
        &self.inner.coordinator
    }
}

impl fmt::Debug for ProxyMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyMiddleware")
            .field("matcher", &self.inner.matcher)
            .field("router", &self.inner.router)
            .field("options", &self.inner.options)
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}

impl Inner {
    /// Router first (it must see the original path), then path rewrite.
    fn prepare(&self, parts: &mut Parts) -> Result<ForwardOptions, ForwardError> {
        let override_target = match &self.router {
            Some(router) => router.get_target(parts)?,
            None => None,
        };

        let snapshot = match override_target {
            Some(target) => {
                tracing::debug!(from = %self.options.target, to = %target, "Router new target");
                ForwardOptions::new(target, self.options.clone())
            }
            None => ForwardOptions::from_shared(self.options.clone()),
        };

        if let Some(rewriter) = &self.rewriter {
            let path = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            match rewriter.rewrite(path, parts) {
                Some(rewritten) => parts.uri = with_path(&parts.uri, &rewritten)?,
                None => tracing::debug!(path = %path, "Rewrite produced nothing, keeping path"),
            }
        }

        Ok(snapshot)
    }

    /// Log a forwarding failure and build the client response.
    fn report(&self, err: &ForwardError, request: &Parts, target: &Url) -> Response {
        tracing::error!(
            url = %request.uri,
            host = %request_host(request),
            target = %target,
            code = err.kind.code(),
            error = %err.message,
            "Error occurred while proxying request"
        );
        self.options.events.error(err, request)
    }

    async fn handle_upgrade(&self, event: UpgradeEvent) {
        self.coordinator.mark_initialized();

        let UpgradeEvent {
            request,
            socket,
            head,
        } = event;

        if !self.matcher.matches(&request.uri.to_string(), &request) {
            tracing::debug!(uri = %request.uri, "Upgrade request out of scope");
            metrics::record_upgrade(Outcome::Skipped);
            return;
        }

        let mut parts = (*request).clone();
        let snapshot = match self.prepare(&mut parts) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                socket.respond(self.report(&e, &request, &self.options.target));
                metrics::record_upgrade(Outcome::Failed);
                return;
            }
        };

        match self
            .forwarder
            .forward_upgrade(parts, socket.clone(), head, &snapshot)
            .await
        {
            Ok(()) => metrics::record_upgrade(Outcome::Proxied),
            Err(e) => {
                socket.respond(self.report(&e, &request, &snapshot.target));
                metrics::record_upgrade(Outcome::Failed);
            }
        }
    }
}

/// Replace the path and query of `uri`, keeping scheme and authority.
fn with_path(uri: &Uri, path: &str) -> Result<Uri, ForwardError> {
    let mut path = path.to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let invalid = |message: String| ForwardError::new(ForwardErrorKind::InvalidTarget, message);
    let path_and_query = PathAndQuery::try_from(path.as_str())
        .map_err(|e| invalid(format!("rewritten path '{}' is invalid: {}", path, e)))?;

    let mut uri_parts = uri.clone().into_parts();
    uri_parts.path_and_query = Some(path_and_query);
    Uri::from_parts(uri_parts).map_err(|e| invalid(e.to_string()))
}

/// axum entry point: `middleware::from_fn_with_state(proxy, proxy_middleware)`.
pub async fn proxy_middleware(
    State(proxy): State<ProxyMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    proxy.handle(request, next).await
}
