//! HTTP server hosting the proxy middleware.
//!
//! # Responsibilities
//! - Create the Axum Router with the proxy middleware in front of a
//!   not-proxied fallback
//! - Emit upgrade requests to the `UpgradeHub` and wait for a handler to
//!   answer them
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener, graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::middleware::{proxy_middleware, ProxyMiddleware};
use crate::http::upgrade::{UpgradeEvent, UpgradeHub, UpgradeSocket};

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    hub: UpgradeHub,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &ProxyConfig, proxy: ProxyMiddleware) -> Self {
        let hub = UpgradeHub::new();
        let router = Self::build_router(config, proxy, hub.clone());
        Self { router, hub }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, proxy: ProxyMiddleware, hub: UpgradeHub) -> Router {
        Router::new()
            .fallback(not_proxied)
            .layer(middleware::from_fn_with_state(proxy, proxy_middleware))
            .layer(middleware::from_fn_with_state(hub, upgrade_dispatch))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Upgrade events of this server.
    pub fn hub(&self) -> &UpgradeHub {
        &self.hub
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Requests the proxy passed on.
async fn not_proxied() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "No proxy context matched")
}

/// Routes upgrade requests to the hub; tags every other request with it.
async fn upgrade_dispatch(
    State(hub): State<UpgradeHub>,
    mut request: Request,
    next: Next,
) -> Response {
    if !is_upgrade_request(request.headers()) {
        request.extensions_mut().insert(hub);
        return next.run(request).await;
    }

    let (socket, answer) = UpgradeSocket::new(hyper::upgrade::on(&mut request));
    let (parts, _) = request.into_parts();
    tracing::debug!(uri = %parts.uri, "Upgrade request received");

    // hyper hands bytes read past the request head to the upgraded IO
    let event = UpgradeEvent {
        request: Arc::new(parts),
        socket,
        head: Bytes::new(),
    };
    if !hub.emit(event) {
        tracing::debug!("No upgrade subscribers");
    }

    match answer.await {
        Ok(response) => response,
        Err(_) => (StatusCode::NOT_FOUND, "No upgrade handler accepted the request").into_response(),
    }
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Wait for shutdown signal (Ctrl+C).
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyOptions;
    use crate::routing::MatchContext;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn server(context: &str) -> HttpServer {
        let options = ProxyOptions::builder()
            .target("http://127.0.0.1:9")
            .ws(true)
            .build()
            .unwrap();
        let proxy = ProxyMiddleware::new(MatchContext::from_pattern(context), options).unwrap();
        HttpServer::new(&ProxyConfig::default(), proxy)
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_out_of_scope_reaches_fallback() {
        let response = server("/api")
            .router()
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_string(response).await, "No proxy context matched");
    }

    #[tokio::test]
    async fn test_first_request_attaches_proxy_to_hub() {
        let server = server("/api");
        assert_eq!(server.hub().subscriber_count(), 0);

        server
            .router()
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(server.hub().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_upgrade_gets_not_found() {
        let request = axum::http::Request::builder()
            .uri("/chat")
            .header("connection", "keep-alive, Upgrade")
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap();

        let response = server("/api").router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_string(response).await,
            "No upgrade handler accepted the request"
        );
    }

    #[test]
    fn test_upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, "websocket".parse().unwrap());
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::CONNECTION, "Upgrade".parse().unwrap());
        assert!(is_upgrade_request(&headers));

        headers.remove(header::UPGRADE);
        assert!(!is_upgrade_request(&headers));
    }
}
