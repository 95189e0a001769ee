//! Forwarding engine.
//!
//! # Responsibilities
//! - Build the upstream request from the effective options (target, path
//!   joining, Host rewrite, static headers, x-forwarded-*)
//! - Send it with the pooled HTTP client and hand back the upstream response
//! - Relay protocol upgrades: answer the client with the upstream 101, then
//!   pipe both upgraded connections into each other
//! - Classify transport failures into `ForwardErrorKind`
//!
//! # Data Flow
//! ```text
//! ProxyMiddleware (rewritten request + ForwardOptions)
//!     → upstream_uri / outgoing headers
//!     → on_proxy_req(_ws) hook
//!     → hyper-util client (optional proxy timeout)
//!     → on_proxy_res hook → response back to the middleware
//! ```
//!
//! # Design Decisions
//! - Plain HTTP only; `https`/`wss` targets fail with `UnsupportedScheme`
//! - Requests always go upstream as HTTP/1.1

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Request, Response, StatusCode, Uri, Version};
use bytes::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::ForwardOptions;
use crate::error::{ForwardError, ForwardErrorKind};
use crate::http::upgrade::UpgradeSocket;
use crate::routing::router::request_host;

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// The engine that performs the actual proxying.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward a plain HTTP request and return the upstream response.
    async fn forward_http(
        &self,
        request: Request<Body>,
        options: &ForwardOptions,
    ) -> Result<Response<Body>, ForwardError>;

    /// Forward an upgrade request. On success the client has been answered
    /// through `socket` and the tunnel (if any) runs in the background.
    async fn forward_upgrade(
        &self,
        request: Parts,
        socket: UpgradeSocket,
        head: Bytes,
        options: &ForwardOptions,
    ) -> Result<(), ForwardError>;
}

/// `Forwarder` backed by the hyper-util pooled client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
}

impl HttpForwarder {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    async fn send(
        &self,
        request: Request<Body>,
        options: &ForwardOptions,
    ) -> Result<Response<hyper::body::Incoming>, ForwardError> {
        let pending = self.client.request(request);
        let result = match options.proxy_timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                ForwardError::new(
                    ForwardErrorKind::ConnectionReset,
                    format!("upstream did not respond within {:?}", limit),
                )
            })?,
            None => pending.await,
        };
        result.map_err(|e| classify(&e))
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward_http(
        &self,
        request: Request<Body>,
        options: &ForwardOptions,
    ) -> Result<Response<Body>, ForwardError> {
        let (incoming, body) = request.into_parts();
        let mut outgoing = outgoing_parts(&incoming, options, false)?;
        options.events.proxy_req(&mut outgoing);

        tracing::debug!(method = %outgoing.method, uri = %outgoing.uri, "Forwarding request");
        let response = self.send(Request::from_parts(outgoing, body), options).await?;

        let (mut head, body) = response.into_parts();
        strip_hop_by_hop(&mut head.headers);
        options.events.proxy_res(&mut head, &incoming);
        Ok(Response::from_parts(head, Body::new(body)))
    }

    async fn forward_upgrade(
        &self,
        request: Parts,
        socket: UpgradeSocket,
        head: Bytes,
        options: &ForwardOptions,
    ) -> Result<(), ForwardError> {
        let mut outgoing = outgoing_parts(&request, options, true)?;
        options.events.proxy_req_ws(&mut outgoing);

        tracing::debug!(uri = %outgoing.uri, "Forwarding upgrade");
        let mut response = self
            .send(Request::from_parts(outgoing, Body::empty()), options)
            .await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            tracing::debug!(status = %response.status(), "Upstream declined the upgrade");
            socket.respond(response.map(Body::new));
            return Ok(());
        }

        let client_io = socket.take_io().ok_or_else(|| {
            ForwardError::new(ForwardErrorKind::Other, "client connection already taken")
        })?;
        let upstream_io = hyper::upgrade::on(&mut response);
        let (head_101, _) = response.into_parts();
        if !socket.respond(Response::from_parts(head_101, Body::empty())) {
            return Err(ForwardError::new(
                ForwardErrorKind::ConnectionReset,
                "client went away before the upgrade completed",
            ));
        }

        let events = options.events.clone();
        tokio::spawn(async move {
            let (client, upstream) = match tokio::try_join!(client_io, upstream_io) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Upgrade handshake failed");
                    return;
                }
            };
            let mut client = TokioIo::new(client);
            let mut upstream = TokioIo::new(upstream);

            if !head.is_empty() {
                if let Err(e) = upstream.write_all(&head).await {
                    tracing::warn!(error = %e, "Failed to replay upgrade head");
                    return;
                }
            }

            events.open(&request);
            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                Ok((to_upstream, to_client)) => {
                    tracing::debug!(to_upstream, to_client, "Upgraded connection closed");
                }
                Err(e) => tracing::debug!(error = %e, "Upgraded connection ended with error"),
            }
            events.close(&request);
        });

        Ok(())
    }
}

/// Build the outgoing request head from the incoming one.
fn outgoing_parts(
    incoming: &Parts,
    options: &ForwardOptions,
    upgrade: bool,
) -> Result<Parts, ForwardError> {
    let mut outgoing = incoming.clone();
    let path_and_query = incoming
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    outgoing.uri = upstream_uri(
        &options.target,
        path_and_query,
        options.prepend_path,
        options.ignore_path,
    )?;
    outgoing.version = Version::HTTP_11;

    let upgrade_protocol = incoming.headers.get(header::UPGRADE).cloned();
    strip_hop_by_hop(&mut outgoing.headers);
    if upgrade {
        if let Some(protocol) = upgrade_protocol {
            outgoing.headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
            outgoing.headers.insert(header::UPGRADE, protocol);
        }
    }

    if options.change_origin {
        if let Some(authority) = outgoing.uri.authority() {
            let host = HeaderValue::from_str(authority.as_str()).map_err(|e| {
                ForwardError::new(ForwardErrorKind::InvalidTarget, e.to_string())
            })?;
            outgoing.headers.insert(header::HOST, host);
        }
    }

    for (name, value) in &options.headers {
        outgoing.headers.insert(name.clone(), value.clone());
    }

    if options.xfwd {
        set_forwarded_headers(incoming, &mut outgoing.headers, upgrade);
    }

    Ok(outgoing)
}

/// Join the target with the request path.
///
/// `prepend_path` keeps the target's own path in front, `ignore_path` drops
/// the request path entirely.
pub fn upstream_uri(
    target: &Url,
    path_and_query: &str,
    prepend_path: bool,
    ignore_path: bool,
) -> Result<Uri, ForwardError> {
    match target.scheme() {
        "http" | "ws" => {}
        other => {
            return Err(ForwardError::new(
                ForwardErrorKind::UnsupportedScheme,
                format!("unsupported target scheme '{}'", other),
            ))
        }
    }

    let host = target.host_str().ok_or_else(|| {
        ForwardError::new(ForwardErrorKind::InvalidTarget, format!("target '{}' has no host", target))
    })?;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let base = if prepend_path {
        target.path().trim_end_matches('/')
    } else {
        ""
    };
    let tail = if ignore_path { "" } else { path_and_query };
    let mut joined = format!("{}{}", base, tail);
    if !joined.starts_with('/') {
        joined.insert(0, '/');
    }

    Uri::builder()
        .scheme("http")
        .authority(authority)
        .path_and_query(joined)
        .build()
        .map_err(|e| ForwardError::new(ForwardErrorKind::InvalidTarget, e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

fn set_forwarded_headers(incoming: &Parts, headers: &mut HeaderMap, upgrade: bool) {
    let host = request_host(incoming);
    let port = host
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .unwrap_or(80);
    let proto = if upgrade { "ws" } else { "http" };

    if let Some(ConnectInfo(addr)) = incoming.extensions.get::<ConnectInfo<SocketAddr>>() {
        append_forwarded(headers, X_FORWARDED_FOR, &addr.ip().to_string());
    }
    append_forwarded(headers, X_FORWARDED_PORT, &port.to_string());
    append_forwarded(headers, X_FORWARDED_PROTO, proto);
    if !host.is_empty() && !headers.contains_key(&X_FORWARDED_HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(X_FORWARDED_HOST, value);
        }
    }
}

/// Append to a comma separated x-forwarded-* list.
fn append_forwarded(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    let joined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{},{}", existing, value),
        _ => value.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&joined) {
        headers.insert(name, value);
    }
}

/// Classify a client error by walking its source chain.
pub fn classify(err: &hyper_util::client::legacy::Error) -> ForwardError {
    let kind = error_kind(err).unwrap_or(ForwardErrorKind::Other);

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    ForwardError::new(kind, message)
}

fn error_kind(err: &(dyn StdError + 'static)) -> Option<ForwardErrorKind> {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        match io_err.kind() {
            io::ErrorKind::ConnectionRefused => return Some(ForwardErrorKind::ConnectionRefused),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut => return Some(ForwardErrorKind::ConnectionReset),
            _ => {}
        }
        if let Some(inner) = io_err.get_ref() {
            if let Some(kind) = error_kind(inner) {
                return Some(kind);
            }
        }
    }

    if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
        if hyper_err.is_parse() || hyper_err.is_parse_status() {
            return Some(ForwardErrorKind::InvalidResponse);
        }
        if hyper_err.is_incomplete_message() || hyper_err.is_closed() || hyper_err.is_canceled() {
            return Some(ForwardErrorKind::ConnectionReset);
        }
    }

    // hyper-util's connector reports resolver failures this way
    if err.to_string().starts_with("dns error") {
        return Some(ForwardErrorKind::HostNotFound);
    }

    err.source().and_then(error_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyOptions;
    use std::fmt;
    use std::sync::Arc;

    fn target(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn options(builder: crate::config::ProxyOptionsBuilder) -> ForwardOptions {
        ForwardOptions::from_shared(Arc::new(builder.build().unwrap()))
    }

    fn incoming(uri: &str) -> Parts {
        Request::builder()
            .uri(uri)
            .header("host", "localhost:3000")
            .header("connection", "keep-alive")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_upstream_uri_joins_paths() {
        let uri = upstream_uri(&target("http://10.0.0.2:4000/base/"), "/api/x?q=1", true, false).unwrap();
        assert_eq!(uri, "http://10.0.0.2:4000/base/api/x?q=1");

        let uri = upstream_uri(&target("http://10.0.0.2:4000/base"), "/api/x", false, false).unwrap();
        assert_eq!(uri, "http://10.0.0.2:4000/api/x");

        let uri = upstream_uri(&target("http://10.0.0.2/base"), "/api/x", true, true).unwrap();
        assert_eq!(uri, "http://10.0.0.2/base");

        let uri = upstream_uri(&target("ws://localhost:4000"), "/socket", true, false).unwrap();
        assert_eq!(uri, "http://localhost:4000/socket");
    }

    #[test]
    fn test_upstream_uri_rejects_tls_targets() {
        let err = upstream_uri(&target("https://example.org"), "/", true, false).unwrap_err();
        assert_eq!(err.kind, ForwardErrorKind::UnsupportedScheme);
    }

    #[test]
    fn test_outgoing_headers() {
        let opts = options(
            ProxyOptions::builder()
                .target("http://127.0.0.1:4000")
                .change_origin(true)
                .xfwd(true)
                .header("x-proxied-by", "proxy-middleware"),
        );
        let mut request = incoming("/api/users");
        request
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 51000))));

        let outgoing = outgoing_parts(&request, &opts, false).unwrap();
        assert_eq!(outgoing.uri, "http://127.0.0.1:4000/api/users");
        assert_eq!(outgoing.headers["host"], "127.0.0.1:4000");
        assert_eq!(outgoing.headers["x-proxied-by"], "proxy-middleware");
        assert_eq!(outgoing.headers["x-forwarded-for"], "192.168.1.7");
        assert_eq!(outgoing.headers["x-forwarded-port"], "3000");
        assert_eq!(outgoing.headers["x-forwarded-proto"], "http");
        assert_eq!(outgoing.headers["x-forwarded-host"], "localhost:3000");
        assert!(!outgoing.headers.contains_key("connection"));
    }

    #[test]
    fn test_upgrade_keeps_upgrade_headers() {
        let opts = options(ProxyOptions::builder().target("http://127.0.0.1:4000"));
        let request = Request::builder()
            .uri("/socket")
            .header("host", "localhost:3000")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let outgoing = outgoing_parts(&request, &opts, true).unwrap();
        assert_eq!(outgoing.headers["upgrade"], "websocket");
        assert_eq!(outgoing.headers["connection"], "upgrade");
        assert_eq!(outgoing.headers["host"], "localhost:3000");
    }

    #[derive(Debug)]
    struct Named(&'static str);

    impl fmt::Display for Named {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StdError for Named {}

    #[test]
    fn test_error_kind_from_io_errors() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(error_kind(&refused), Some(ForwardErrorKind::ConnectionRefused));

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(error_kind(&reset), Some(ForwardErrorKind::ConnectionReset));

        let wrapped = io::Error::new(io::ErrorKind::Other, io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(error_kind(&wrapped), Some(ForwardErrorKind::ConnectionRefused));
    }

    #[test]
    fn test_error_kind_dns() {
        assert_eq!(error_kind(&Named("dns error")), Some(ForwardErrorKind::HostNotFound));
        assert_eq!(error_kind(&Named("something else")), None);
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let opts = options(ProxyOptions::builder().target(format!("http://127.0.0.1:{}", port)));
        let request = Request::builder()
            .uri("/api")
            .header("host", "localhost:3000")
            .body(Body::empty())
            .unwrap();

        let err = HttpForwarder::new().forward_http(request, &opts).await.unwrap_err();
        assert_eq!(err.kind, ForwardErrorKind::ConnectionRefused);
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
