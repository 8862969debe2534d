#![forbid(unsafe_code)]

//! The observable list contract.
//!
//! # Design
//!
//! [`ListModel<T>`] is object safe so decorators can hold their sources as
//! [`SharedList<T>`] (`Rc<dyn ListModel<T>>`). Reads return owned clones of
//! items; element types are expected to be cheap to clone (ids, `Rc`s, small
//! values). Query helpers such as [`index_of`](ListModel::index_of) have
//! default implementations built on `len` and `get`.
//!
//! # Invariants
//!
//! 1. `get(i)` is `Some` exactly for `i < len()`.
//! 2. When a listener receives an event, `len()` and `get()` already reflect
//!    the mutation the event describes.
//! 3. A removal preview listener runs while the doomed items are still
//!    readable.

use std::rc::Rc;

use crate::dispatch::Subscription;
use crate::error::{ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemoveNotice};

/// Listener for committed list changes.
pub type EventCallback<T> = Box<dyn FnMut(&ListEvent<T>) -> ListenerResult>;

/// Listener for pending removals.
pub type PreviewCallback<T> = Box<dyn FnMut(&RemoveNotice<T>) -> ListenerResult>;

/// Shared, type-erased list handle.
pub type SharedList<T> = Rc<dyn ListModel<T>>;

/// An ordered, indexable sequence that reports its structural changes.
pub trait ListModel<T> {
    /// Number of items.
    fn len(&self) -> usize;

    /// Item at `index`, or `None` when out of range.
    fn get(&self, index: usize) -> Option<T>;

    /// Register a change listener.
    fn observe(&self, listener: EventCallback<T>) -> Subscription;

    /// Register a listener that runs before items are removed.
    fn observe_removal_preview(&self, listener: PreviewCallback<T>) -> Subscription;

    /// Report the item at `index` as updated. Out-of-range indices are ignored.
    fn force_update_at(&self, index: usize) -> ListenerResult;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items in the half-open range `from..to`.
    fn sub_list(&self, from: usize, to: usize) -> Result<Vec<T>> {
        ModelError::check_range(from, to, self.len())?;
        Ok((from..to).filter_map(|i| self.get(i)).collect())
    }

    /// Every item, in order.
    fn to_vec(&self) -> Vec<T> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// First index whose item satisfies `predicate`.
    fn position(&self, predicate: &dyn Fn(&T) -> bool) -> Option<usize> {
        (0..self.len()).find(|&i| self.get(i).is_some_and(|item| predicate(&item)))
    }

    /// First item satisfying `predicate`.
    fn find(&self, predicate: &dyn Fn(&T) -> bool) -> Option<T> {
        (0..self.len())
            .filter_map(|i| self.get(i))
            .find(|item| predicate(item))
    }

    fn index_of(&self, item: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.index_of_in(item, 0, self.len())
    }

    /// First index of `item` inside `from..to` (clamped to the list).
    fn index_of_in(&self, item: &T, from: usize, to: usize) -> Option<usize>
    where
        T: PartialEq,
    {
        let to = to.min(self.len());
        (from..to).find(|&i| self.get(i).as_ref() == Some(item))
    }

    fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.index_of(item).is_some()
    }

    /// Indices of the given items that are present, in argument order.
    fn indices_of(&self, items: &[T]) -> Vec<usize>
    where
        T: PartialEq,
    {
        items.iter().filter_map(|item| self.index_of(item)).collect()
    }

    /// Closure-friendly [`observe`](Self::observe).
    fn listen(&self, listener: impl FnMut(&ListEvent<T>) -> ListenerResult + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.observe(Box::new(listener))
    }
}

impl<T, L: ListModel<T> + ?Sized> ListModel<T> for Rc<L> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Option<T> {
        (**self).get(index)
    }

    fn observe(&self, listener: EventCallback<T>) -> Subscription {
        (**self).observe(listener)
    }

    fn observe_removal_preview(&self, listener: PreviewCallback<T>) -> Subscription {
        (**self).observe_removal_preview(listener)
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        (**self).force_update_at(index)
    }
}

/// A list that is always empty and never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyList;

impl<T> ListModel<T> for EmptyList {
    fn len(&self) -> usize {
        0
    }

    fn get(&self, _index: usize) -> Option<T> {
        None
    }

    fn observe(&self, _listener: EventCallback<T>) -> Subscription {
        Subscription::detached()
    }

    fn observe_removal_preview(&self, _listener: PreviewCallback<T>) -> Subscription {
        Subscription::detached()
    }

    fn force_update_at(&self, _index: usize) -> ListenerResult {
        Ok(())
    }
}

/// Wrap a list into a [`SharedList`].
pub fn shared<T, L: ListModel<T> + 'static>(list: L) -> SharedList<T> {
    Rc::new(list)
}
