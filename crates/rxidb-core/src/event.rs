//! Typed publish/subscribe for connection and transaction notifications
//!
//! Listeners may add or remove listeners while being called. Each emission
//! reaches the listeners registered when it started.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::DbError;

/// Returned by `add_event_listener`; pass it back to remove the listener.
pub type ListenerId = u64;

type Listener<E> = Rc<dyn Fn(&E)>;

/// Typed synchronous event bus.
pub struct EventBus<E> {
    listeners: RefCell<Vec<(ListenerId, Listener<E>)>>,
    next_id: Cell<ListenerId>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    /// Register `listener` and return its id.
    pub fn on(&self, listener: impl Fn(&E) + 'static) -> ListenerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Remove the listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Connection-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseEvent {
    /// A transaction of this connection aborted.
    Abort(DbError),
    /// Another connection asked for a new version (or a delete, `None`).
    VersionChange {
        old_version: u32,
        new_version: Option<u32>,
    },
    /// The connection closed.
    Close,
}

/// Kinds of [`DatabaseEvent`], for filtered listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseEventKind {
    Abort,
    VersionChange,
    Close,
}

impl DatabaseEvent {
    pub fn kind(&self) -> DatabaseEventKind {
        match self {
            DatabaseEvent::Abort(_) => DatabaseEventKind::Abort,
            DatabaseEvent::VersionChange { .. } => DatabaseEventKind::VersionChange,
            DatabaseEvent::Close => DatabaseEventKind::Close,
        }
    }
}

/// Transaction-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEvent {
    Complete,
    Abort(DbError),
    /// A request failed; an abort follows.
    Error(DbError),
}

/// Kinds of [`TransactionEvent`], for filtered listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionEventKind {
    Complete,
    Abort,
    Error,
}

impl TransactionEvent {
    pub fn kind(&self) -> TransactionEventKind {
        match self {
            TransactionEvent::Complete => TransactionEventKind::Complete,
            TransactionEvent::Abort(_) => TransactionEventKind::Abort,
            TransactionEvent::Error(_) => TransactionEventKind::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_listeners_in_order() {
        let bus = EventBus::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            bus.on(move |n| seen.borrow_mut().push(format!("{}{}", tag, n)));
        }
        bus.emit(&1);
        assert_eq!(*seen.borrow(), vec!["a1", "b1"]);
    }

    #[test]
    fn test_off_unregisters() {
        let bus = EventBus::<()>::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = bus.on(move |_| counter.set(counter.get() + 1));
        bus.emit(&());
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&());
        assert_eq!(hits.get(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_listener_added_during_emit_waits_for_next_round() {
        let bus = Rc::new(EventBus::<()>::new());
        let hits = Rc::new(Cell::new(0));

        let inner_bus = bus.clone();
        let counter = hits.clone();
        bus.on(move |_| {
            let counter = counter.clone();
            inner_bus.on(move |_| counter.set(counter.get() + 1));
        });

        bus.emit(&());
        assert_eq!(hits.get(), 0);
        bus.emit(&());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(DatabaseEvent::Close.kind(), DatabaseEventKind::Close);
        assert_eq!(
            TransactionEvent::Abort(DbError::Abort("x".into())).kind(),
            TransactionEventKind::Abort
        );
    }
}
