//! Trailing-edge debounce.
//!
//! Every call stores its argument and (re)starts the window. When a window
//! elapses with no newer call, the most recent argument is dispatched once.
//! Arguments replaced within the window are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;

/// Target of a debounced call.
pub type DispatchFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Pending<T> {
    generation: u64,
    args: Option<T>,
}

struct Inner<T> {
    window: Duration,
    dispatch: DispatchFn<T>,
    pending: Mutex<Pending<T>>,
}

/// Coalesces bursts of calls into a single dispatch.
pub struct Debouncer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(window: Duration, dispatch: DispatchFn<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                dispatch,
                pending: Mutex::new(Pending {
                    generation: 0,
                    args: None,
                }),
            }),
        }
    }

    /// Schedule a dispatch with `args`, superseding any pending call.
    ///
    /// Outside a Tokio runtime the call is logged and dropped.
    pub fn call(&self, args: T) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "No Tokio runtime, debounced call dropped");
                return;
            }
        };

        let generation = {
            let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.generation = pending.generation.wrapping_add(1);
            pending.args = Some(args);
            pending.generation
        };

        let inner = self.inner.clone();
        runtime.spawn(async move {
            tokio::time::sleep(inner.window).await;

            let args = {
                let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
                if pending.generation != generation {
                    return;
                }
                pending.args.take()
            };

            if let Some(args) = args {
                (inner.dispatch)(args).await;
            }
        });
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.inner.window)
            .finish_non_exhaustive()
    }
}
