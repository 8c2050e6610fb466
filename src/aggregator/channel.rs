//! Per-instance publish/subscribe channel.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An event that can be routed by kind.
pub trait ChannelEvent: Send + Sync {
    type Kind: Copy + Eq + Send + Sync;

    fn kind(&self) -> Self::Kind;
}

/// Identifier of a registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Routes events to the handlers registered for their kind.
///
/// Each owner has its own channel; there is no global bus. Handlers for the
/// same kind run in no guaranteed order.
pub struct EventChannel<E: ChannelEvent> {
    handlers: RwLock<Vec<(HandlerId, E::Kind, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E: ChannelEvent> EventChannel<E> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.write().push((id, kind, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns false if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _, _)| *h != id);
        handlers.len() != before
    }

    /// Deliver `event` to every handler of its kind. Returns how many ran.
    ///
    /// Handlers run outside the internal lock and may register or remove
    /// handlers; such changes apply from the next emit.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let targets: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();

        for handler in &targets {
            handler(event);
        }
        targets.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl<E: ChannelEvent> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}
