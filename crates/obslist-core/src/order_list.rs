#![forbid(unsafe_code)]

//! Mutable backing list with change notification.
//!
//! # Design
//!
//! [`OrderList<T>`] owns its items in shared, reference-counted storage, the
//! same way a reactive `Observable` shares its value: cloning the handle
//! yields another view of the **same** list. Every mutation commits to the
//! storage, releases the borrow, then notifies listeners, so listeners may
//! freely read the list they observe.
//!
//! # Invariants
//!
//! 1. Each successful mutation fires exactly the events that describe it, in
//!    order, after storage already reflects it.
//! 2. Removals fire a [`RemoveNotice`] to preview listeners before storage
//!    changes and a `Remove` event afterwards.
//! 3. Sorting is stable and never fires for a range that is already ordered.
//!
//! # Failure Modes
//!
//! - **Bad index**: returns [`ModelError::IndexOutOfBounds`] or
//!   [`ModelError::InvalidRange`] and leaves the list untouched.
//! - **Listener error**: the mutation has already committed; the error is
//!   returned to the caller after every step of the mutation has run.
//! - **Mutation from a listener of the same list**: rejected by the
//!   dispatcher with [`ModelError::ReentrantDispatch`].

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashSet;

use crate::dispatch::{Dispatcher, Subscription};
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemoveNotice, Reorder};
use crate::model::{EventCallback, ListModel, PreviewCallback};

struct OrderListInner<T> {
    items: RefCell<Vec<T>>,
    events: Rc<Dispatcher<ListEvent<T>>>,
    previews: Rc<Dispatcher<RemoveNotice<T>>>,
}

/// Shared, observable vector.
///
/// Cloning an `OrderList` creates a new handle to the **same** storage.
pub struct OrderList<T> {
    inner: Rc<OrderListInner<T>>,
}

impl<T> Clone for OrderList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for OrderList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderList")
            .field("items", &self.inner.items.borrow())
            .field("listeners", &self.inner.events.listener_count())
            .finish()
    }
}

impl<T: Clone + 'static> Default for OrderList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> OrderList<T> {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// List holding `items`.
    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(OrderListInner {
                items: RefCell::new(items),
                events: Dispatcher::new(),
                previews: Dispatcher::new(),
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// Borrowed access to one item.
    pub fn with<R>(&self, index: usize, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.items.borrow().get(index).map(f)
    }

    /// Borrowed access to all items.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.items.borrow())
    }

    /// Number of registered change listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.events.listener_count()
    }

    /// Mutate storage without firing anything.
    pub(crate) fn edit_silently<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        f(&mut self.inner.items.borrow_mut())
    }

    pub(crate) fn fire(&self, event: ListEvent<T>) -> ListenerResult {
        self.inner.events.fire(&event)
    }

    // -- insertion ----------------------------------------------------------

    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.insert_all(index, vec![item])
    }

    /// Insert `items` at `index` as one `Insert` event.
    pub fn insert_all(&self, index: usize, items: Vec<T>) -> Result<()> {
        let len = self.len();
        if index > len {
            return Err(ModelError::IndexOutOfBounds { index, len });
        }
        let count = items.len();
        if count == 0 {
            return Ok(());
        }
        self.inner
            .items
            .borrow_mut()
            .splice(index..index, items);
        self.fire(ListEvent::Insert { index, len: count })
    }

    /// Append `item`; returns its index.
    pub fn push(&self, item: T) -> Result<usize> {
        let index = self.len();
        self.insert_all(index, vec![item])?;
        Ok(index)
    }

    pub fn push_all(&self, items: Vec<T>) -> Result<()> {
        self.insert_all(self.len(), items)
    }

    /// Insertion point that keeps a list ordered by `cmp` ordered.
    ///
    /// Equal items are placed after the existing ones.
    #[must_use]
    pub fn find_place(&self, item: &T, cmp: impl Fn(&T, &T) -> Ordering) -> usize {
        self.with_items(|items| items.partition_point(|probe| cmp(probe, item) != Ordering::Greater))
    }

    /// Insert into a list ordered by `cmp`; returns the new index.
    pub fn insert_sorted(&self, item: T, cmp: impl Fn(&T, &T) -> Ordering) -> Result<usize> {
        let index = self.find_place(&item, cmp);
        self.insert_all(index, vec![item])?;
        Ok(index)
    }

    // -- removal ------------------------------------------------------------

    /// Remove `from..to` as one `Remove` event; returns the removed items.
    pub fn remove_range(&self, from: usize, to: usize) -> Result<Vec<T>> {
        ModelError::check_range(from, to, self.len())?;
        if from == to {
            return Ok(Vec::new());
        }
        let snapshot: Rc<[T]> = self.inner.items.borrow()[from..to].to_vec().into();
        let notice = RemoveNotice::new(from, snapshot);
        let mut errors = FirstError::new();
        errors.record(self.inner.previews.fire(&notice));
        self.inner.items.borrow_mut().drain(from..to);
        let removed = notice.into_removed();
        let items = removed.items().to_vec();
        errors.record(self.fire(ListEvent::Remove(removed)));
        errors.finish()?;
        Ok(items)
    }

    pub fn remove_at(&self, index: usize) -> Result<T> {
        let len = self.len();
        ModelError::check_index(index, len)?;
        self.remove_range(index, index + 1)?
            .pop()
            .ok_or(ModelError::IndexOutOfBounds { index, len })
    }

    /// Remove every item matching `predicate`; each contiguous run fires one
    /// `Remove`. Returns the number of removed items.
    pub fn remove_where(&self, mut predicate: impl FnMut(&T) -> bool) -> Result<usize> {
        let doomed: Vec<usize> = self.with_items(|items| {
            items
                .iter()
                .enumerate()
                .filter(|(_, item)| predicate(item))
                .map(|(i, _)| i)
                .collect()
        });
        let count = doomed.len();
        self.remove_sorted_indices(&doomed)?;
        Ok(count)
    }

    /// Remove the items at `indices` (any order, duplicates allowed).
    pub fn remove_indices(&self, indices: &[usize]) -> Result<()> {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(ModelError::IndexOutOfBounds { index: bad, len });
        }
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.remove_sorted_indices(&sorted)
    }

    /// `sorted` must be strictly increasing and in range.
    fn remove_sorted_indices(&self, sorted: &[usize]) -> Result<()> {
        let mut errors = FirstError::new();
        for (start, end) in runs(sorted).into_iter().rev() {
            errors.record(self.remove_range(start, end).map(drop));
        }
        errors.finish()
    }

    /// Remove the first occurrence of each of `items`.
    pub fn remove_items(&self, items: &[T]) -> Result<()>
    where
        T: PartialEq,
    {
        let indices = self.with_items(|current| {
            items
                .iter()
                .filter_map(|item| current.iter().position(|c| c == item))
                .collect::<Vec<_>>()
        });
        self.remove_indices(&indices)
    }

    /// Remove the first occurrence of `item`; returns whether one was found.
    pub fn remove_item(&self, item: &T) -> Result<bool>
    where
        T: PartialEq,
    {
        match self.with_items(|items| items.iter().position(|c| c == item)) {
            Some(index) => self.remove_range(index, index + 1).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.remove_range(0, self.len()).map(drop)
    }

    /// Replace the whole content: one `Remove` then one `Insert`.
    pub fn set_elements(&self, items: Vec<T>) -> Result<()> {
        let mut errors = FirstError::new();
        errors.record(self.clear());
        errors.record(self.push_all(items));
        errors.finish()
    }

    // -- in-place changes -----------------------------------------------------

    /// Replace the item at `index` and fire `Update`; returns the old item.
    pub fn replace_at(&self, index: usize, item: T) -> Result<T> {
        let old = self.replace_at_silent(index, item)?;
        self.fire(ListEvent::update(index, index))?;
        Ok(old)
    }

    /// Replace the item at `index` without any event.
    pub fn replace_at_silent(&self, index: usize, item: T) -> Result<T> {
        let mut items = self.inner.items.borrow_mut();
        ModelError::check_index(index, items.len())?;
        Ok(std::mem::replace(&mut items[index], item))
    }

    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        let len = self.len();
        ModelError::check_index(a, len)?;
        ModelError::check_index(b, len)?;
        if a == b {
            return Ok(());
        }
        self.inner.items.borrow_mut().swap(a, b);
        self.fire(ListEvent::Rearrange(Reorder::swap(a, b)))
    }

    /// Move one item; items in between shift by one.
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        let len = self.len();
        ModelError::check_index(from, len)?;
        ModelError::check_index(to, len)?;
        if from == to {
            return Ok(());
        }
        {
            let mut items = self.inner.items.borrow_mut();
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.fire(ListEvent::Rearrange(Reorder::moved(from, to)))
    }

    pub fn update_at(&self, index: usize) -> Result<()> {
        self.update_range(index, index)
    }

    /// Fire `Update` over `low..=high` (bounds in any order).
    pub fn update_range(&self, low: usize, high: usize) -> Result<()> {
        let (low, high) = (low.min(high), low.max(high));
        ModelError::check_index(high, self.len())?;
        self.fire(ListEvent::Update { low, high })
    }

    pub fn update_all(&self) -> Result<()> {
        match self.len() {
            0 => Ok(()),
            len => self.update_range(0, len - 1),
        }
    }

    /// Fire `Update` for every position holding one of `items`; adjacent
    /// positions share one event.
    pub fn update_items(&self, items: &[T]) -> Result<()>
    where
        T: PartialEq,
    {
        let touched: Vec<usize> = self.with_items(|current| {
            current
                .iter()
                .enumerate()
                .filter(|(_, c)| items.contains(c))
                .map(|(i, _)| i)
                .collect()
        });
        let mut errors = FirstError::new();
        for (start, end) in runs(&touched) {
            errors.record(self.update_range(start, end - 1));
        }
        errors.finish()
    }

    // -- ordering -------------------------------------------------------------

    pub fn sort_by(&self, cmp: impl Fn(&T, &T) -> Ordering) -> Result<()> {
        match self.len() {
            0 => Ok(()),
            len => self.sort_range_by(0, len - 1, cmp),
        }
    }

    /// Stable sort of `low..=high`; fires one `Rearrange` unless the range was
    /// already in order.
    pub fn sort_range_by(&self, low: usize, high: usize, cmp: impl Fn(&T, &T) -> Ordering) -> Result<()> {
        let (low, high) = (low.min(high), low.max(high));
        ModelError::check_index(high, self.len())?;
        let order: Vec<usize> = self.with_items(|items| {
            let segment = &items[low..=high];
            let mut order: Vec<usize> = (0..segment.len()).collect();
            order.sort_by(|&a, &b| cmp(&segment[a], &segment[b]));
            order
        });
        if order.iter().enumerate().all(|(k, &i)| k == i) {
            return Ok(());
        }
        let mut targets = vec![0; order.len()];
        for (new_pos, &old_pos) in order.iter().enumerate() {
            targets[old_pos] = low + new_pos;
        }
        {
            let mut items = self.inner.items.borrow_mut();
            let sorted: Vec<T> = order.iter().map(|&i| items[low + i].clone()).collect();
            items.splice(low..=high, sorted);
        }
        self.fire(ListEvent::Rearrange(Reorder::from_targets(low, targets)))
    }

    /// Sort only when out of order; returns whether a sort happened.
    pub fn ensure_sorted(&self, cmp: impl Fn(&T, &T) -> Ordering) -> Result<bool> {
        if self.is_sorted_by(&cmp) {
            return Ok(false);
        }
        self.sort_by(cmp)?;
        Ok(true)
    }

    #[must_use]
    pub fn is_sorted_by(&self, cmp: impl Fn(&T, &T) -> Ordering) -> bool {
        self.with_items(|items| items.windows(2).all(|w| cmp(&w[0], &w[1]) != Ordering::Greater))
    }

    /// Whether `low..=high` is ordered, including against its neighbours.
    #[must_use]
    pub fn is_range_sorted_by(&self, low: usize, high: usize, cmp: impl Fn(&T, &T) -> Ordering) -> bool {
        self.with_items(|items| {
            let from = low.saturating_sub(1);
            let to = (high + 1).min(items.len().saturating_sub(1));
            from >= to || items[from..=to].windows(2).all(|w| cmp(&w[0], &w[1]) != Ordering::Greater)
        })
    }

    /// `Update` when `low..=high` is still ordered; otherwise the items of
    /// the range are moved to their places. Items outside the range must
    /// already be ordered.
    pub fn sort_or_update(&self, low: usize, high: usize, cmp: impl Fn(&T, &T) -> Ordering) -> Result<()> {
        let (low, high) = (low.min(high), low.max(high));
        ModelError::check_index(high, self.len())?;
        if self.is_range_sorted_by(low, high, &cmp) {
            self.update_range(low, high)
        } else {
            let positions: Vec<usize> = (low..=high).collect();
            self.reposition(&positions, cmp)
        }
    }

    /// Move the items at `positions` to their ordered places, assuming every
    /// other item is already ordered. The result equals a stable sort. Fires
    /// one `Rearrange` over the span that moved, nothing when nothing moved.
    ///
    /// Costs `O(k log n)` comparisons for `k` positions.
    pub fn reposition(&self, positions: &[usize], cmp: impl Fn(&T, &T) -> Ordering) -> Result<()> {
        let len = self.len();
        let mut moving = positions.to_vec();
        moving.sort_unstable();
        moving.dedup();
        if let Some(&last) = moving.last() {
            ModelError::check_index(last, len)?;
        } else {
            return Ok(());
        }

        let order: Vec<usize> = self.with_items(|items| {
            // Stable: `moving` is ascending before the sort.
            moving.sort_by(|&a, &b| cmp(&items[a], &items[b]));
            let mut is_moving = vec![false; len];
            for &i in &moving {
                is_moving[i] = true;
            }
            let rest: Vec<usize> = (0..len).filter(|&i| !is_moving[i]).collect();
            // Equal items keep their original relative order.
            let before = |r: usize, c: usize| match cmp(&items[r], &items[c]) {
                Ordering::Less => true,
                Ordering::Equal => r < c,
                Ordering::Greater => false,
            };
            let mut order = Vec::with_capacity(len);
            let mut next = 0;
            for &c in &moving {
                let place = rest.partition_point(|&r| before(r, c));
                order.extend_from_slice(&rest[next..place.max(next)]);
                next = next.max(place);
                order.push(c);
            }
            order.extend_from_slice(&rest[next..]);
            order
        });

        let Some(lo) = order.iter().enumerate().position(|(p, &i)| p != i) else {
            return Ok(());
        };
        let hi = order.iter().enumerate().rposition(|(p, &i)| p != i).unwrap_or(lo);
        let mut targets = vec![0; hi - lo + 1];
        for (p, &i) in order.iter().enumerate().take(hi + 1).skip(lo) {
            targets[i - lo] = p;
        }
        {
            let mut items = self.inner.items.borrow_mut();
            let moved: Vec<T> = order[lo..=hi].iter().map(|&i| items[i].clone()).collect();
            items.splice(lo..=hi, moved);
        }
        self.fire(ListEvent::Rearrange(Reorder::from_targets(lo, targets)))
    }

    /// Replace `from..from + new_order.len()` with a permutation of itself.
    pub fn rearrange(&self, from: usize, new_order: Vec<T>) -> Result<()>
    where
        T: PartialEq,
    {
        let count = new_order.len();
        ModelError::check_range(from, from + count, self.len())?;
        if count == 0 {
            return Ok(());
        }
        let targets = self.with_items(|items| {
            let mut used = vec![false; count];
            let mut targets = Vec::with_capacity(count);
            for old in &items[from..from + count] {
                let slot = (0..count).find(|&k| !used[k] && new_order[k] == *old)?;
                used[slot] = true;
                targets.push(from + slot);
            }
            Some(targets)
        });
        let Some(targets) = targets else {
            return Err(ModelError::inconsistent(
                "rearrange order is not a permutation of the range",
            ));
        };
        let reorder = Reorder::from_targets(from, targets);
        if reorder.is_identity() {
            return Ok(());
        }
        self.inner
            .items
            .borrow_mut()
            .splice(from..from + count, new_order);
        self.fire(ListEvent::Rearrange(reorder))
    }
}

impl<T: Clone + Eq + Hash + 'static> OrderList<T> {
    /// Keep items that are in `items`, drop the rest, append the new ones.
    pub fn replace_elements_set(&self, items: Vec<T>) -> Result<()> {
        let wanted: AHashSet<T> = items.iter().cloned().collect();
        let mut errors = FirstError::new();
        errors.record(self.remove_where(|item| !wanted.contains(item)).map(drop));
        let present: AHashSet<T> = self.with_items(|current| current.iter().cloned().collect());
        let mut seen = AHashSet::new();
        let fresh: Vec<T> = items
            .into_iter()
            .filter(|item| !present.contains(item) && seen.insert(item.clone()))
            .collect();
        errors.record(self.push_all(fresh));
        errors.finish()
    }
}

impl<T: Clone + 'static> ListModel<T> for OrderList<T> {
    fn len(&self) -> usize {
        OrderList::len(self)
    }

    fn get(&self, index: usize) -> Option<T> {
        OrderList::get(self, index)
    }

    fn observe(&self, listener: EventCallback<T>) -> Subscription {
        self.inner.events.subscribe(listener)
    }

    fn observe_removal_preview(&self, listener: PreviewCallback<T>) -> Subscription {
        self.inner.previews.subscribe(listener)
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        if index < self.len() {
            self.update_range(index, index)
        } else {
            Ok(())
        }
    }
}

/// Half-open runs of consecutive values in a strictly increasing slice.
pub(crate) fn runs(sorted: &[usize]) -> Vec<(usize, usize)> {
    let mut out: Vec<(usize, usize)> = Vec::new();
    for &i in sorted {
        match out.last_mut() {
            Some((_, end)) if *end == i => *end += 1,
            _ => out.push((i, i + 1)),
        }
    }
    out
}
