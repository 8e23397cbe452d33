//! Synchronous publish/subscribe registry
//!
//! Handlers run on the calling thread, in subscription order, before
//! `publish` returns. Unsubscribing is allowed from inside a handler: the
//! dispatch loop walks a snapshot of the subscriber list and skips any
//! entry that was removed after the snapshot was taken.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::trace;

/// An event that can travel over an [`EventBus`]
pub trait BusEvent {
    /// Discriminant used to route the event to subscribers
    type Kind: Copy + Eq + std::fmt::Debug;

    /// The kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Token returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Rc<dyn Fn(&E)>;

struct Subscriber<E: BusEvent> {
    id: SubscriptionId,
    kind: E::Kind,
    handler: Handler<E>,
    active: Rc<Cell<bool>>,
}

struct BusInner<E: BusEvent> {
    next_id: u64,
    subscribers: Vec<Subscriber<E>>,
}

/// Typed, single-threaded event bus
pub struct EventBus<E: BusEvent> {
    inner: RefCell<BusInner<E>>,
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(BusInner {
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Register `handler` for events of `kind`
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            kind,
            handler: Rc::new(handler),
            active: Rc::new(Cell::new(true)),
        });
        trace!("Subscribed {:?} to {:?}", id, kind);
        id
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner.subscribers.iter().position(|s| s.id == id) {
            Some(index) => {
                let subscriber = inner.subscribers.remove(index);
                // A dispatch already in progress may still hold this entry.
                subscriber.active.set(false);
                trace!("Unsubscribed {:?}", id);
                true
            }
            None => false,
        }
    }

    /// Invoke every current subscriber for the event's kind
    pub fn publish(&self, event: &E) {
        let kind = event.kind();
        let snapshot: Vec<(Handler<E>, Rc<Cell<bool>>)> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.handler.clone(), s.active.clone()))
            .collect();

        trace!("Publishing {:?} to {} subscriber(s)", kind, snapshot.len());

        for (handler, active) in snapshot {
            if active.get() {
                handler(event);
            }
        }
    }

    /// Number of handlers registered for `kind`
    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
