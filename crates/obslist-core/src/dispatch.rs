#![forbid(unsafe_code)]

//! Synchronous listener dispatch with RAII subscriptions.
//!
//! # Design
//!
//! A [`Dispatcher<E>`] owns an ordered list of listener slots. Each slot is
//! reference-counted so a dispatch can iterate over a snapshot of the list
//! while listeners subscribe or unsubscribe from inside their callbacks.
//! [`Subscription`] holds a weak reference back to the dispatcher and removes
//! its slot on drop.
//!
//! # Invariants
//!
//! 1. Listeners are notified in subscription order.
//! 2. A disposed slot is never invoked again, even when it is still part of
//!    the snapshot of a dispatch that is currently running.
//! 3. At most one dispatch runs per dispatcher at a time.
//!
//! # Failure Modes
//!
//! - **Nested fire**: a listener that mutates the list it listens to triggers
//!   a second `fire` on the same dispatcher. The nested call is rejected with
//!   [`ModelError::ReentrantDispatch`] and logged at `ERROR`.
//! - **Listener error**: with a single listener the error is returned to the
//!   mutator. With several listeners every error is logged and the remaining
//!   listeners still run.
//! - **Dispatcher dropped**: outstanding subscriptions become inert.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::error;

use crate::error::{ListenerResult, ModelError};

type Callback<E> = Box<dyn FnMut(&E) -> ListenerResult>;

struct Slot<E> {
    id: u64,
    active: Cell<bool>,
    callback: RefCell<Callback<E>>,
}

trait Unsubscribe {
    fn unsubscribe(&self, id: u64);
}

/// Listener registry for one event stream.
pub(crate) struct Dispatcher<E> {
    slots: RefCell<Vec<Rc<Slot<E>>>>,
    next_id: Cell<u64>,
    firing: Cell<bool>,
}

struct FiringGuard<'a>(&'a Cell<bool>);

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<E: 'static> Dispatcher<E> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            firing: Cell::new(false),
        })
    }

    /// Register `callback`; it stays registered while the returned handle lives.
    pub(crate) fn subscribe(self: &Rc<Self>, callback: Callback<E>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.slots.borrow_mut().push(Rc::new(Slot {
            id,
            active: Cell::new(true),
            callback: RefCell::new(callback),
        }));
        let target: Weak<dyn Unsubscribe> = Rc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription {
            target: Some(target),
            id,
        }
    }

    #[must_use]
    pub(crate) fn listener_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Deliver `event` to every active listener.
    pub(crate) fn fire(&self, event: &E) -> ListenerResult {
        if self.firing.get() {
            error!("event fired while the same dispatcher is still notifying listeners");
            return Err(ModelError::ReentrantDispatch);
        }
        let snapshot: SmallVec<[Rc<Slot<E>>; 4]> = self.slots.borrow().iter().cloned().collect();
        if snapshot.is_empty() {
            return Ok(());
        }
        self.firing.set(true);
        let _guard = FiringGuard(&self.firing);

        let single = snapshot.len() == 1;
        for slot in &snapshot {
            if !slot.active.get() {
                continue;
            }
            let result = match slot.callback.try_borrow_mut() {
                Ok(mut callback) => callback(event),
                Err(_) => Err(ModelError::ReentrantDispatch),
            };
            if let Err(err) = result {
                if single {
                    return Err(err);
                }
                error!(listener = slot.id, error = %err, "list listener failed");
            }
        }
        Ok(())
    }
}

impl<E> Unsubscribe for Dispatcher<E> {
    fn unsubscribe(&self, id: u64) {
        let mut slots = self.slots.borrow_mut();
        if let Some(pos) = slots.iter().position(|slot| slot.id == id) {
            let slot = slots.remove(pos);
            slot.active.set(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a registered listener.
///
/// Dropping the guard (or calling [`dispose`](Self::dispose)) unregisters the
/// listener; no callback is delivered afterwards.
#[must_use = "dropping a Subscription unregisters the listener immediately"]
pub struct Subscription {
    target: Option<Weak<dyn Unsubscribe>>,
    id: u64,
}

impl Subscription {
    /// A subscription that was never attached to anything.
    pub fn detached() -> Self {
        Self {
            target: None,
            id: 0,
        }
    }

    /// Unregister now.
    pub fn dispose(mut self) {
        self.release();
    }

    /// Whether the listener is still reachable.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Whether both handles listen to the same, still live, dispatcher.
    pub(crate) fn same_source(&self, other: &Subscription) -> bool {
        match (&self.target, &other.target) {
            (Some(a), Some(b)) => a.strong_count() > 0 && Weak::ptr_eq(a, b),
            _ => false,
        }
    }

    fn release(&mut self) {
        if let Some(target) = self.target.take().and_then(|weak| weak.upgrade()) {
            target.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}
