// In-process message bus
//
// Addresses are plain strings. Each `subscribe` registers one handler
// with its own unbounded queue, so a slow handler never blocks dispatch
// to the others and delivery to a single handler stays in send order.
// `publish` fans out to every handler; `send` and `request` pick one,
// rotating across handlers at the same address.

pub mod address;
mod message;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

pub use message::{Headers, Message, Payload};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("No handlers registered at '{address}'")]
    NoHandlers { address: String },

    #[error("No reply from '{address}' within {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("Handler at '{address}' failed ({code}): {message}")]
    ReplyFailed {
        address: String,
        code: u16,
        message: String,
    },

    #[error("Handler at '{address}' dropped the request without replying")]
    NoReply { address: String },
}

struct Route {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct BusInner {
    routes: DashMap<String, Vec<Route>>,
    next_route: AtomicU64,
    cursor: AtomicUsize,
}

impl BusInner {
    fn unsubscribe(&self, address: &str, id: u64) {
        let now_empty = match self.routes.get_mut(address) {
            Some(mut routes) => {
                routes.retain(|r| r.id != id);
                routes.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.routes.remove_if(address, |_, routes| routes.is_empty());
        }
        trace!(address, "handler unregistered");
    }
}

/// Cheaply cloneable handle to the bus.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler at `address`. Dropping the subscription
    /// unregisters it.
    pub fn subscribe(&self, address: impl Into<String>) -> Subscription {
        let address = address.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_route.fetch_add(1, Ordering::Relaxed);
        self.inner
            .routes
            .entry(address.clone())
            .or_default()
            .push(Route { id, tx });
        debug!(address = %address, "handler registered");

        Subscription {
            address,
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn handler_count(&self, address: &str) -> usize {
        self.inner.routes.get(address).map_or(0, |r| r.len())
    }

    /// Deliver to every handler at `address`. Returns how many received it.
    pub fn publish(&self, address: &str, payload: Payload, headers: Headers) -> usize {
        let Some(routes) = self.inner.routes.get(address) else {
            trace!(address, "publish with no handlers");
            return 0;
        };
        routes
            .iter()
            .filter(|route| {
                route
                    .tx
                    .send(Message::new(address, payload.clone(), headers.clone()))
                    .is_ok()
            })
            .count()
    }

    /// Deliver to exactly one handler at `address`.
    pub fn send(&self, address: &str, payload: Payload, headers: Headers) -> Result<(), BusError> {
        self.dispatch(Message::new(address, payload, headers))
    }

    /// Send to one handler and wait for its reply.
    pub async fn request(
        &self,
        address: &str,
        payload: Payload,
        headers: Headers,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Message::new(address, payload, headers).with_reply(tx))?;

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => Err(BusError::Timeout {
                address: address.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Ok(Err(_)) => Err(BusError::NoReply {
                address: address.to_owned(),
            }),
            Ok(Ok(result)) => result,
        }
    }

    fn dispatch(&self, message: Message) -> Result<(), BusError> {
        let no_handlers = || BusError::NoHandlers {
            address: message.address().to_owned(),
        };
        let Some(routes) = self.inner.routes.get(message.address()) else {
            return Err(no_handlers());
        };
        if routes.is_empty() {
            return Err(no_handlers());
        }

        let start = self.inner.cursor.fetch_add(1, Ordering::Relaxed);
        let address = message.address().to_owned();
        let mut pending = message;
        for offset in 0..routes.len() {
            let Some(route) = routes.get((start + offset) % routes.len()) else {
                continue;
            };
            match route.tx.send(pending) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(back)) => pending = back,
            }
        }
        Err(BusError::NoHandlers { address })
    }
}

/// A registered handler's queue.
pub struct Subscription {
    address: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next message for this handler.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.unsubscribe(&self.address, self.id);
        }
    }
}
