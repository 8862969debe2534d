#![forbid(unsafe_code)]

//! User-ordered subset of a full list, with its complement.
//!
//! # Design
//!
//! [`SubsetList<T>`] holds a user-ordered selection of items from a full
//! list. A [`TwoWayIndexMap`] links each selected item to its position in the
//! full list. When an item leaves the full list while selected it stays in the
//! subset as a *detached* element; if an equal item is later inserted into the
//! full list, the detached element is linked to it again.
//!
//! The complement (full list minus subset) is an [`ImageList`] that does not
//! subscribe to the full list itself: the subset forwards every full-list
//! event to it after its own bookkeeping, and resynchs it after every subset
//! mutation. A full-list event that changes selected values (an update of a
//! linked item, or new items joining a default-inclusive subset) resynchs the
//! whole complement, because membership is decided by value.
//!
//! # Invariants
//!
//! 1. The index map never links a detached element.
//! 2. Detached values are counted per value: the count of `v` equals the
//!    number of unlinked subset positions holding `v`.
//! 3. Removing items from the full list never removes them from the subset.
//! 4. Subset order only changes through subset operations.
//!
//! # Failure Modes
//!
//! - **Removing an element neither linked nor detached**: logged at `WARN`
//!   and otherwise ignored.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

use crate::dispatch::Subscription;
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemovedEvent, Reorder};
use crate::image::ImageList;
use crate::index_map::TwoWayIndexMap;
use crate::model::{EventCallback, ListModel, PreviewCallback, SharedList};
use crate::order_list::{OrderList, runs};

struct SubsetState<T> {
    full: SharedList<T>,
    subset: OrderList<T>,
    links: RefCell<TwoWayIndexMap>,
    detached: RefCell<AHashMap<T, usize>>,
    default_in_subset: bool,
    complement: ImageList<T, T>,
    subscription: RefCell<Option<Subscription>>,
}

/// Ordered selection from a full list.
///
/// Cloning a `SubsetList` creates a new handle to the **same** selection.
pub struct SubsetList<T> {
    state: Rc<SubsetState<T>>,
}

impl<T> Clone for SubsetList<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + Eq + Hash + fmt::Debug + 'static> fmt::Debug for SubsetList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsetList")
            .field("subset", &self.state.subset.to_vec())
            .field("detached", &self.detached_count())
            .finish()
    }
}

impl<T: Clone + Eq + Hash + 'static> SubsetList<T> {
    /// Selection over `full`. With `default_in_subset` the whole full list
    /// starts selected and new full-list items join the subset.
    pub fn new(full: impl ListModel<T> + 'static, default_in_subset: bool) -> Self {
        let full: SharedList<T> = Rc::new(full);
        let mut links = TwoWayIndexMap::new();
        let initial = if default_in_subset {
            let items = full.to_vec();
            for i in 0..items.len() {
                links.insert(i, i);
            }
            items
        } else {
            Vec::new()
        };
        let subset = OrderList::from_vec(initial);
        let selected = subset.clone();
        let complement = ImageList::driven(
            Rc::clone(&full),
            move |item: &T| !selected.with_items(|items| items.contains(item)),
            T::clone,
        );
        let list = Self {
            state: Rc::new(SubsetState {
                full,
                subset,
                links: RefCell::new(links),
                detached: RefCell::new(AHashMap::new()),
                default_in_subset,
                complement,
                subscription: RefCell::new(None),
            }),
        };
        let weak: Weak<SubsetState<T>> = Rc::downgrade(&list.state);
        let subscription = list.state.full.observe(Box::new(move |event| match weak.upgrade() {
            Some(state) => state.on_full_event(event),
            None => Ok(()),
        }));
        *list.state.subscription.borrow_mut() = Some(subscription);
        list
    }

    /// Items of the full list that are not selected, in full-list order.
    #[must_use]
    pub fn complement(&self) -> ImageList<T, T> {
        self.state.complement.clone()
    }

    #[must_use]
    pub fn full_set(&self) -> SharedList<T> {
        Rc::clone(&self.state.full)
    }

    /// Whether the subset item at `index` has no counterpart in the full list.
    #[must_use]
    pub fn is_detached(&self, index: usize) -> bool {
        index < self.state.subset.len() && self.state.links.borrow().full_of(index).is_none()
    }

    #[must_use]
    pub fn detached_count(&self) -> usize {
        self.state.detached.borrow().values().sum()
    }

    /// Full-list index linked to subset position `index`.
    #[must_use]
    pub fn full_index_of(&self, index: usize) -> Option<usize> {
        self.state.links.borrow().full_of(index)
    }

    /// Append `item`, linking it to the full list when possible.
    pub fn add(&self, item: T) -> Result<()> {
        self.add_from_complement(vec![item])
    }

    /// Append `items` (typically taken from the complement).
    pub fn add_from_complement(&self, items: Vec<T>) -> Result<()> {
        let mut claimed = AHashSet::new();
        let mut links = Vec::with_capacity(items.len());
        for item in items {
            match self.state.free_full_index(&item, &claimed) {
                Some(full) => {
                    claimed.insert(full);
                    links.push((Some(full), item));
                }
                None if self.state.full.contains(&item) => {}
                None => links.push((None, item)),
            }
        }
        self.state.append(links)
    }

    /// Append the full-list items at `indices`; already selected ones are skipped.
    pub fn add_from_full_set(&self, indices: &[usize]) -> Result<()> {
        let len = self.state.full.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(ModelError::IndexOutOfBounds { index: bad, len });
        }
        let mut seen = AHashSet::new();
        let links = {
            let current = self.state.links.borrow();
            indices
                .iter()
                .copied()
                .filter(|&i| !current.contains_full(i) && seen.insert(i))
                .filter_map(|i| self.state.full.get(i).map(|item| (Some(i), item)))
                .collect()
        };
        self.state.append(links)
    }

    /// Insert `item` at subset position `index`.
    ///
    /// Like [`add`](Self::add), an item whose full-list occurrences are all
    /// selected already is skipped.
    pub fn insert_from_complement(&self, index: usize, item: T) -> Result<()> {
        let len = self.state.subset.len();
        if index > len {
            return Err(ModelError::IndexOutOfBounds { index, len });
        }
        let full = self.state.free_full_index(&item, &AHashSet::new());
        if full.is_none() && self.state.full.contains(&item) {
            return Ok(());
        }
        {
            let mut links = self.state.links.borrow_mut();
            links.shift_subset(index, 1);
            match full {
                Some(full) => links.insert(full, index),
                None => detach_value(&mut self.state.detached.borrow_mut(), &item),
            }
        }
        let mut errors = FirstError::new();
        errors.record(self.state.subset.insert(index, item));
        errors.record(self.state.complement.resynch());
        errors.finish()
    }

    /// Exchange two subset positions.
    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        let len = self.state.subset.len();
        ModelError::check_index(a, len)?;
        ModelError::check_index(b, len)?;
        {
            let mut links = self.state.links.borrow_mut();
            let full_a = links.remove_subset(a);
            let full_b = links.remove_subset(b);
            if let Some(full) = full_a {
                links.insert(full, b);
            }
            if let Some(full) = full_b {
                links.insert(full, a);
            }
        }
        self.state.subset.swap(a, b)
    }

    /// Replace the selection with `items`.
    pub fn set_subset(&self, items: Vec<T>) -> Result<()> {
        let mut errors = FirstError::new();
        errors.record(self.state.reset());
        errors.record(self.add_from_complement(items));
        errors.finish()
    }

    /// Replace the selection with the full-list items at `indices`.
    ///
    /// Does nothing when the selection already is exactly those items.
    pub fn set_subset_indices(&self, indices: &[usize]) -> Result<()> {
        let len = self.state.full.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(ModelError::IndexOutOfBounds { index: bad, len });
        }
        if self.state.relink_if_unchanged(indices) {
            return Ok(());
        }
        let mut errors = FirstError::new();
        errors.record(self.state.reset());
        errors.record(self.add_from_full_set(indices));
        errors.finish()
    }

    /// Select the whole full list, in full-list order.
    pub fn set_full(&self) -> Result<()> {
        let indices: Vec<usize> = (0..self.state.full.len()).collect();
        let mut errors = FirstError::new();
        errors.record(self.state.reset());
        errors.record(self.add_from_full_set(&indices));
        errors.finish()
    }

    /// Remove the subset items at `indices`.
    pub fn remove_all_at(&self, indices: &[usize]) -> Result<()> {
        let len = self.state.subset.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(ModelError::IndexOutOfBounds { index: bad, len });
        }
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.state.remove_positions(&sorted)
    }

    /// Remove the first selected occurrence of each of `items`.
    pub fn remove_items(&self, items: &[T]) -> Result<()> {
        let positions = self.state.subset.with_items(|current| {
            let mut taken = vec![false; current.len()];
            let mut positions = Vec::new();
            for item in items {
                if let Some(pos) = (0..current.len()).find(|&p| !taken[p] && current[p] == *item) {
                    taken[pos] = true;
                    positions.push(pos);
                }
            }
            positions
        });
        self.remove_all_at(&positions)
    }

    /// Remove every selected item matching `predicate`.
    pub fn remove_where(&self, mut predicate: impl FnMut(&T) -> bool) -> Result<()> {
        let positions: Vec<usize> = self.state.subset.with_items(|current| {
            current
                .iter()
                .enumerate()
                .filter(|(_, item)| predicate(item))
                .map(|(pos, _)| pos)
                .collect()
        });
        self.state.remove_positions(&positions)
    }

    pub fn detach(&self) {
        self.state.subscription.borrow_mut().take();
    }

    /// Verify links, detached values and the complement.
    pub fn check_consistent(&self) -> Result<()> {
        let state = &self.state;
        let links = state.links.borrow();
        for (full, subset) in links.iter() {
            if state.full.get(full).is_none() || state.full.get(full) != state.subset.get(subset) {
                return Err(ModelError::inconsistent(format!(
                    "subset {subset} is linked to full {full} with a different value"
                )));
            }
        }
        let mut unlinked: AHashMap<T, usize> = AHashMap::new();
        for pos in 0..state.subset.len() {
            if links.full_of(pos).is_none() {
                if let Some(item) = state.subset.get(pos) {
                    *unlinked.entry(item).or_insert(0) += 1;
                }
            }
        }
        drop(links);
        if unlinked != *state.detached.borrow() {
            return Err(ModelError::inconsistent(format!(
                "{} unlinked subset items but {} detached values",
                unlinked.values().sum::<usize>(),
                self.detached_count()
            )));
        }
        state.complement.check_consistent()
    }
}

impl<T: Clone + Eq + Hash + 'static> SubsetState<T> {
    /// First full-list index holding `item` that is neither linked nor claimed.
    fn free_full_index(&self, item: &T, claimed: &AHashSet<usize>) -> Option<usize> {
        let links = self.links.borrow();
        (0..self.full.len()).find(|&i| {
            !links.contains_full(i) && !claimed.contains(&i) && self.full.get(i).as_ref() == Some(item)
        })
    }

    /// Append items with their links (`None` = detached), one `Insert`.
    fn append(&self, entries: Vec<(Option<usize>, T)>) -> Result<()> {
        let base = self.subset.len();
        let mut items = Vec::with_capacity(entries.len());
        {
            let mut links = self.links.borrow_mut();
            let mut detached = self.detached.borrow_mut();
            for (offset, (full, item)) in entries.into_iter().enumerate() {
                match full {
                    Some(full) => links.insert(full, base + offset),
                    None => detach_value(&mut detached, &item),
                }
                items.push(item);
            }
        }
        let mut errors = FirstError::new();
        errors.record(self.subset.push_all(items));
        errors.record(self.complement.resynch());
        errors.finish()
    }

    /// Empty the selection.
    fn reset(&self) -> Result<()> {
        self.links.borrow_mut().clear();
        self.detached.borrow_mut().clear();
        self.subset.clear()
    }

    /// Relink in place when the subset already shows `indices`; returns
    /// whether the selection matched.
    fn relink_if_unchanged(&self, indices: &[usize]) -> bool {
        if self.subset.len() != indices.len() {
            return false;
        }
        let mut distinct = AHashSet::with_capacity(indices.len());
        if !indices.iter().all(|&full| distinct.insert(full)) {
            return false;
        }
        let matches = indices
            .iter()
            .enumerate()
            .all(|(pos, &full)| self.full.get(full).is_some() && self.full.get(full) == self.subset.get(pos));
        if !matches {
            return false;
        }
        let mut links = self.links.borrow_mut();
        let mut detached = self.detached.borrow_mut();
        for (pos, &full) in indices.iter().enumerate() {
            match links.full_of(pos) {
                Some(current) if current == full => {}
                Some(_) => links.insert(full, pos),
                None => {
                    if let Some(item) = self.subset.get(pos) {
                        take_detached(&mut detached, &item);
                    }
                    links.insert(full, pos);
                }
            }
        }
        true
    }

    /// `sorted` is strictly increasing and in range.
    fn remove_positions(&self, sorted: &[usize]) -> Result<()> {
        if sorted.is_empty() {
            return Ok(());
        }
        {
            let mut links = self.links.borrow_mut();
            let mut detached = self.detached.borrow_mut();
            for &pos in sorted {
                if links.remove_subset(pos).is_some() {
                    continue;
                }
                let was_detached = self
                    .subset
                    .with(pos, |item| take_detached(&mut detached, item))
                    .unwrap_or(false);
                if !was_detached {
                    warn!(position = pos, "removed subset element was neither linked nor detached");
                }
            }
            links.remap(|full, subset| (full, subset - sorted.partition_point(|&p| p < subset)));
        }
        let mut errors = FirstError::new();
        for (from, to) in runs(sorted).into_iter().rev() {
            errors.record(self.subset.remove_range(from, to).map(drop));
        }
        errors.record(self.complement.resynch());
        errors.finish()
    }

    fn on_full_event(&self, event: &ListEvent<T>) -> ListenerResult {
        let mut errors = FirstError::new();
        let selection_changed = match event {
            ListEvent::Insert { index, len } => errors.record_or(self.on_full_insert(*index, *len), true),
            ListEvent::Remove(removed) => {
                self.on_full_remove(removed);
                false
            }
            ListEvent::Update { low, high } => errors.record_or(self.on_full_update(*low, *high), true),
            ListEvent::Rearrange(reorder) => {
                self.on_full_rearrange(reorder);
                false
            }
        };
        errors.record(self.complement.apply_source_event(event));
        if selection_changed {
            errors.record(self.complement.resynch());
        }
        errors.finish()
    }

    /// Returns whether items joined the subset.
    fn on_full_insert(&self, index: usize, len: usize) -> Result<bool> {
        self.links.borrow_mut().shift_full(index, len as isize);
        let mut joining = Vec::new();
        for i in index..index + len {
            let Some(item) = self.full.get(i) else {
                continue;
            };
            let reattached = take_detached(&mut self.detached.borrow_mut(), &item);
            if reattached {
                let position = {
                    let links = self.links.borrow();
                    self.subset.with_items(|current| {
                        (0..current.len()).find(|&p| links.full_of(p).is_none() && current[p] == item)
                    })
                };
                match position {
                    Some(position) => {
                        self.links.borrow_mut().insert(i, position);
                        debug!(full = i, subset = position, "detached element reattached");
                    }
                    None => warn!(full = i, "detached element missing from subset"),
                }
            } else if self.default_in_subset {
                joining.push((Some(i), item));
            }
        }
        if joining.is_empty() {
            return Ok(false);
        }
        let base = self.subset.len();
        let mut items = Vec::with_capacity(joining.len());
        {
            let mut links = self.links.borrow_mut();
            for (offset, (full, item)) in joining.into_iter().enumerate() {
                if let Some(full) = full {
                    links.insert(full, base + offset);
                }
                items.push(item);
            }
        }
        self.subset.push_all(items)?;
        Ok(true)
    }

    fn on_full_remove(&self, removed: &RemovedEvent<T>) {
        let mut links = self.links.borrow_mut();
        let mut detached = self.detached.borrow_mut();
        for offset in 0..removed.len() {
            let full = removed.first_index() + offset;
            if links.remove_full(full).is_some() {
                if let Some(item) = removed.item(offset) {
                    detach_value(&mut detached, item);
                }
            }
        }
        links.shift_full(removed.first_index() + removed.len(), -(removed.len() as isize));
    }

    fn on_full_rearrange(&self, reorder: &Reorder) {
        self.links
            .borrow_mut()
            .remap(|full, subset| (reorder.new_index(full), subset));
    }

    /// Returns whether selected values were refreshed.
    fn on_full_update(&self, low: usize, high: usize) -> Result<bool> {
        let targets: Vec<(usize, usize)> = {
            let links = self.links.borrow();
            (low..=high)
                .filter_map(|full| links.subset_of(full).map(|subset| (subset, full)))
                .collect()
        };
        let mut positions = Vec::with_capacity(targets.len());
        for (subset, full) in targets {
            if let Some(item) = self.full.get(full) {
                self.subset.replace_at_silent(subset, item)?;
                positions.push(subset);
            }
        }
        positions.sort_unstable();
        let mut errors = FirstError::new();
        for (from, to) in runs(&positions) {
            errors.record(self.subset.update_range(from, to - 1));
        }
        errors.finish()?;
        Ok(!positions.is_empty())
    }
}

fn detach_value<T: Clone + Eq + Hash>(detached: &mut AHashMap<T, usize>, item: &T) {
    *detached.entry(item.clone()).or_insert(0) += 1;
}

/// Decrement the detached count of `item`; returns whether it was detached.
fn take_detached<T: Eq + Hash>(detached: &mut AHashMap<T, usize>, item: &T) -> bool {
    match detached.get_mut(item) {
        Some(count) if *count > 1 => {
            *count -= 1;
            true
        }
        Some(_) => {
            detached.remove(item);
            true
        }
        None => false,
    }
}

impl<T: Clone + Eq + Hash + 'static> ListModel<T> for SubsetList<T> {
    fn len(&self) -> usize {
        self.state.subset.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.state.subset.get(index)
    }

    fn observe(&self, listener: EventCallback<T>) -> Subscription {
        self.state.subset.observe(listener)
    }

    fn observe_removal_preview(&self, listener: PreviewCallback<T>) -> Subscription {
        self.state.subset.observe_removal_preview(listener)
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        self.state.subset.force_update_at(index)
    }
}
