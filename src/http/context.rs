//! Per-request call-context.
//!
//! Shared between the proxy middleware, the response interceptor and any
//! middleware that runs after the proxy. Downstream stages find it in the
//! request extensions as `Arc<CallContext>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use axum::http::response;
use serde_json::Value;
use tokio::sync::watch;

#[derive(Debug)]
pub struct CallContext {
    respond: AtomicBool,
    proxy_response: OnceLock<response::Parts>,
    body: OnceLock<Value>,
    settled: watch::Sender<bool>,
}

impl CallContext {
    pub fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            respond: AtomicBool::new(true),
            proxy_response: OnceLock::new(),
            body: OnceLock::new(),
            settled,
        }
    }

    /// False once the proxy owns the response; downstream responses are
    /// then ignored.
    pub fn respond(&self) -> bool {
        self.respond.load(Ordering::Acquire)
    }

    pub(crate) fn respond_elsewhere(&self) {
        self.respond.store(false, Ordering::Release);
    }

    /// Head of the upstream response, once it arrived.
    pub fn proxy_response(&self) -> Option<&response::Parts> {
        self.proxy_response.get()
    }

    pub(crate) fn set_proxy_response(&self, head: response::Parts) {
        let _ = self.proxy_response.set(head);
    }

    /// Structured body, available after the intercepted response ended.
    pub fn body(&self) -> Option<&Value> {
        self.body.get()
    }

    pub(crate) fn set_body(&self, body: Value) {
        let _ = self.body.set(body);
    }

    pub(crate) fn settle(&self) {
        self.settled.send_replace(true);
    }

    /// True once body interception finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Wait for interception to finish and return the structured body.
    ///
    /// Resolves only after the response body has been streamed, so it must
    /// not be awaited by a stage that runs before the response is returned.
    pub async fn settled_body(&self) -> Option<Value> {
        let mut rx = self.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
        self.body.get().cloned()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let ctx = CallContext::new();
        assert!(ctx.respond());
        assert!(ctx.body().is_none());
        assert!(ctx.proxy_response().is_none());
        assert!(!ctx.is_settled());
    }

    #[test]
    fn test_body_is_set_once() {
        let ctx = CallContext::new();
        ctx.set_body(json!({"a": 1}));
        ctx.set_body(json!({"a": 2}));
        assert_eq!(ctx.body(), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_settled_body_waits_for_settle() {
        let ctx = Arc::new(CallContext::new());
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.settled_body().await })
        };

        tokio::task::yield_now().await;
        ctx.set_body(json!([1, 2, 3]));
        ctx.settle();

        assert_eq!(waiter.await.unwrap(), Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn test_settled_without_body() {
        let ctx = CallContext::new();
        ctx.settle();
        assert_eq!(ctx.settled_body().await, None);
    }
}
