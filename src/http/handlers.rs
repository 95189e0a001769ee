//! Forwarding event hooks.
//!
//! The forwarding engine reports through these hooks. `on_error` and
//! `on_close` always have a handler; the rest are optional.

use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::response;
use axum::response::{IntoResponse, Response};

use crate::error::ForwardError;
use crate::routing::router::request_host;

/// Turns a forwarding failure into the client response.
pub type ErrorHandler = Arc<dyn Fn(&ForwardError, &Parts) -> Response + Send + Sync>;
pub type RequestHook = Arc<dyn Fn(&mut Parts) + Send + Sync>;
pub type ResponseHook = Arc<dyn Fn(&mut response::Parts, &Parts) + Send + Sync>;
pub type TunnelHook = Arc<dyn Fn(&Parts) + Send + Sync>;

#[derive(Clone)]
pub struct ProxyEvents {
    pub on_error: ErrorHandler,
    /// Runs on the outgoing request head before it is sent upstream.
    pub on_proxy_req: Option<RequestHook>,
    /// Same as `on_proxy_req`, for upgrade requests.
    pub on_proxy_req_ws: Option<RequestHook>,
    pub on_proxy_res: Option<ResponseHook>,
    pub on_open: Option<TunnelHook>,
    pub on_close: TunnelHook,
}

impl Default for ProxyEvents {
    fn default() -> Self {
        Self {
            on_error: Arc::new(default_error_handler),
            on_proxy_req: None,
            on_proxy_req_ws: None,
            on_proxy_res: None,
            on_open: None,
            on_close: Arc::new(default_close_handler),
        }
    }
}

impl ProxyEvents {
    pub fn error(&self, err: &ForwardError, request: &Parts) -> Response {
        (self.on_error)(err, request)
    }

    pub fn proxy_req(&self, outgoing: &mut Parts) {
        if let Some(hook) = &self.on_proxy_req {
            hook(outgoing);
        }
    }

    pub fn proxy_req_ws(&self, outgoing: &mut Parts) {
        if let Some(hook) = &self.on_proxy_req_ws {
            hook(outgoing);
        }
    }

    pub fn proxy_res(&self, upstream: &mut response::Parts, request: &Parts) {
        if let Some(hook) = &self.on_proxy_res {
            hook(upstream, request);
        }
    }

    pub fn open(&self, request: &Parts) {
        if let Some(hook) = &self.on_open {
            hook(request);
        }
    }

    pub fn close(&self, request: &Parts) {
        (self.on_close)(request);
    }
}

impl fmt::Debug for ProxyEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEvents")
            .field("on_proxy_req", &self.on_proxy_req.is_some())
            .field("on_proxy_req_ws", &self.on_proxy_req_ws.is_some())
            .field("on_proxy_res", &self.on_proxy_res.is_some())
            .field("on_open", &self.on_open.is_some())
            .finish_non_exhaustive()
    }
}

/// Maps the error code to a status and ends the response with a short
/// diagnostic naming the requested host and URL.
pub fn default_error_handler(err: &ForwardError, request: &Parts) -> Response {
    let url = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let body = format!(
        "Error occurred while trying to proxy to: {}{}",
        request_host(request),
        url
    );
    (err.status(), body).into_response()
}

fn default_close_handler(request: &Parts) {
    tracing::debug!(uri = %request.uri, "Client disconnected");
}
