//! Response body interception.
//!
//! When enabled, the upstream body is wrapped in `InterceptedBody`. Frames
//! pass through to the client untouched while a copy is buffered. When the
//! stream ends the buffer is parsed as JSON, optionally transformed, and the
//! result is stored on the `CallContext`. The bytes the client receives are
//! never altered.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::response;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use http_body::{Frame, SizeHint};
use serde_json::Value;

use crate::http::context::CallContext;
use crate::observability::metrics;

/// Transform applied to the parsed upstream body.
pub type TransformFn = Arc<
    dyn Fn(Value, &response::Parts, &Parts, &CallContext) -> Result<Value, axum::BoxError>
        + Send
        + Sync,
>;

/// Body interception mode.
#[derive(Clone, Default)]
pub enum ProxyBody {
    #[default]
    Disabled,
    /// Store the parsed body on the call-context as-is.
    Capture,
    Transform(TransformFn),
}

impl ProxyBody {
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(Value, &response::Parts, &Parts, &CallContext) -> Result<Value, axum::BoxError>
            + Send
            + Sync
            + 'static,
    {
        ProxyBody::Transform(Arc::new(f))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ProxyBody::Disabled)
    }
}

impl fmt::Debug for ProxyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyBody::Disabled => f.write_str("Disabled"),
            ProxyBody::Capture => f.write_str("Capture"),
            ProxyBody::Transform(_) => f.write_str("Transform(<fn>)"),
        }
    }
}

struct Pending {
    mode: ProxyBody,
    response: response::Parts,
    request: Parts,
    ctx: Arc<CallContext>,
}

impl Pending {
    fn resolve(&self, buffer: &[u8]) -> Result<Option<Value>, axum::BoxError> {
        let parsed: Value = serde_json::from_slice(buffer)?;
        match &self.mode {
            ProxyBody::Disabled => Ok(None),
            ProxyBody::Capture => Ok(Some(parsed)),
            ProxyBody::Transform(transform) => {
                transform(parsed, &self.response, &self.request, &self.ctx).map(Some)
            }
        }
    }
}

/// Pass-through body that buffers a copy of every data frame.
pub struct InterceptedBody {
    inner: Body,
    buffer: BytesMut,
    pending: Option<Pending>,
}

impl InterceptedBody {
    fn finish(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let buffer = std::mem::take(&mut self.buffer).freeze();

        if buffer.is_empty() {
            tracing::debug!("Empty upstream body, nothing to intercept");
        } else {
            match pending.resolve(&buffer) {
                Ok(Some(value)) => pending.ctx.set_body(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        status = %pending.response.status,
                        bytes = buffer.len(),
                        "Failed to intercept response body"
                    );
                    metrics::record_transform_failure();
                }
            }
        }

        pending.ctx.settle();
    }

    fn abandon(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.buffer.clear();
            pending.ctx.settle();
        }
    }
}

impl http_body::Body for InterceptedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if this.pending.is_some() {
                    if let Some(data) = frame.data_ref() {
                        this.buffer.extend_from_slice(data);
                    }
                }
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                this.abandon();
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for InterceptedBody {
    fn drop(&mut self) {
        // client went away before the end of the stream
        self.abandon();
    }
}

/// Wrap `response` so its body is intercepted into `ctx`.
///
/// With interception disabled the response is returned as-is and the
/// context is settled right away.
pub fn intercept(
    response: Response<Body>,
    mode: &ProxyBody,
    request: Parts,
    ctx: Arc<CallContext>,
) -> Response<Body> {
    if !mode.is_enabled() {
        ctx.settle();
        return response;
    }

    let (parts, body) = response.into_parts();
    let wrapped = InterceptedBody {
        inner: body,
        buffer: BytesMut::new(),
        pending: Some(Pending {
            mode: mode.clone(),
            response: parts.clone(),
            request,
            ctx,
        }),
    };
    Response::from_parts(parts, Body::new(wrapped))
}
