//! Protocol-upgrade plumbing.
//!
//! # Responsibilities
//! - `UpgradeHub`: the server-side "upgrade" event source; the hosting
//!   server emits every upgrade request through it
//! - `UpgradeSocket`: the client side of one upgrade, answerable once
//! - `UpgradeCoordinator`: subscribes a middleware instance to a hub at most
//!   once and debounces the dispatch to its upgrade handler
//!
//! # Data Flow
//! ```text
//! Client upgrade request
//!     → server (upgrade_dispatch) builds UpgradeEvent
//!     → UpgradeHub::emit → every subscribed handler
//!     → Debouncer (trailing window, last event wins)
//!     → ProxyMiddleware::handle_upgrade (match, route, rewrite, forward)
//!     → UpgradeSocket::respond (101 from upstream, or an error response)
//! ```
//!
//! # Design Decisions
//! - The subscription flag is claimed with a single compare-and-set, so
//!   concurrent first requests cannot subscribe twice
//! - The flag is never reset

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;
use hyper::upgrade::OnUpgrade;
use tokio::sync::oneshot;

use crate::http::debounce::{Debouncer, DispatchFn};

/// Handler subscribed to a hub.
pub type UpgradeHandler = Arc<dyn Fn(UpgradeEvent) + Send + Sync>;

/// One upgrade notification.
#[derive(Clone)]
pub struct UpgradeEvent {
    pub request: Arc<Parts>,
    pub socket: UpgradeSocket,
    /// Bytes received after the request head, to be replayed upstream.
    pub head: Bytes,
}

impl fmt::Debug for UpgradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeEvent")
            .field("uri", &self.request.uri)
            .field("head", &self.head.len())
            .finish()
    }
}

struct SocketSlot {
    io: Option<OnUpgrade>,
    responder: Option<oneshot::Sender<Response<Body>>>,
}

/// Client side of an upgrade request.
///
/// Clones share the same slot: the response can be sent once and the
/// upgraded IO taken once. When every clone is dropped unanswered, the
/// server answers the client itself.
#[derive(Clone)]
pub struct UpgradeSocket {
    slot: Arc<Mutex<SocketSlot>>,
}

impl UpgradeSocket {
    /// Returns the socket and the receiver the server awaits for its answer.
    pub fn new(io: OnUpgrade) -> (Self, oneshot::Receiver<Response<Body>>) {
        let (tx, rx) = oneshot::channel();
        let socket = Self {
            slot: Arc::new(Mutex::new(SocketSlot {
                io: Some(io),
                responder: Some(tx),
            })),
        };
        (socket, rx)
    }

    /// Send the response for the upgrade request. Returns false if it was
    /// already answered or the client is gone.
    pub fn respond(&self, response: Response<Body>) -> bool {
        let responder = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .responder
            .take();
        match responder {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Take the future resolving to the upgraded client connection.
    pub fn take_io(&self) -> Option<OnUpgrade> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).io.take()
    }

    pub fn is_answered(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .responder
            .is_none()
    }
}

/// Server-side upgrade event source.
#[derive(Clone, Default)]
pub struct UpgradeHub {
    subscribers: Arc<RwLock<Vec<UpgradeHandler>>>,
}

impl UpgradeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: UpgradeHandler) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every subscriber. Returns false if nobody listens.
    pub fn emit(&self, event: UpgradeEvent) -> bool {
        let handlers: Vec<UpgradeHandler> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in &handlers {
            handler(event.clone());
        }
        !handlers.is_empty()
    }
}

impl fmt::Debug for UpgradeHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Subscribes a middleware instance to a server's upgrade events once.
pub struct UpgradeCoordinator {
    initialized: AtomicBool,
    debounced: Debouncer<UpgradeEvent>,
}

impl UpgradeCoordinator {
    pub fn new(window: Duration, dispatch: DispatchFn<UpgradeEvent>) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            debounced: Debouncer::new(window, dispatch),
        }
    }

    /// Subscribe the debounced handler to `hub` unless this coordinator is
    /// already initialized. Returns true if this call subscribed.
    pub fn attach(&self, hub: &UpgradeHub) -> bool {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        hub.subscribe(self.handler());
        tracing::debug!("Subscribed to server upgrade events");
        true
    }

    /// The debounced handler, for wiring to a hub by hand.
    pub fn handler(&self) -> UpgradeHandler {
        let debounced = self.debounced.clone();
        Arc::new(move |event| debounced.call(event))
    }

    /// Feed one upgrade notification through the debouncer.
    pub fn trigger(&self, event: UpgradeEvent) {
        self.debounced.call(event);
    }

    /// Record that the handler is in use even though `attach` never ran.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

impl fmt::Debug for UpgradeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeCoordinator")
            .field("initialized", &self.is_initialized())
            .field("debounced", &self.debounced)
            .finish()
    }
}
