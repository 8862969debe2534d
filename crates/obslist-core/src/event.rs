#![forbid(unsafe_code)]

//! Structural change events reported by list models.
//!
//! # Design
//!
//! A [`ListEvent`] describes one committed mutation of a list:
//!
//! - `Insert { index, len }`: `len` items now occupy `index..index + len`.
//! - `Remove(RemovedEvent)`: items that used to occupy a range, with a
//!   snapshot of their values.
//! - `Update { low, high }`: items in `low..=high` changed value in place.
//! - `Rearrange(Reorder)`: items inside a range moved; [`Reorder`] maps every
//!   old index to its new one.
//!
//! A [`RemoveNotice`] is the pre-removal counterpart of `Remove`: listeners
//! receive it while the doomed items are still readable by index.
//!
//! # Invariants
//!
//! 1. `Insert` and `Remove` always carry `len > 0`.
//! 2. `Update` and `Rearrange` ranges are inclusive and satisfy `low <= high`.
//! 3. A [`Reorder`] is a bijection on `low..=high`; every index outside the
//!    range maps to itself.
//! 4. Translating an event by `diff` shifts every index it mentions by `diff`
//!    and nothing else.

use std::fmt;
use std::ops::RangeInclusive;
use std::rc::Rc;

use crate::model::ListModel;

// ---------------------------------------------------------------------------
// Reorder
// ---------------------------------------------------------------------------

/// Index translation of a `Rearrange` event.
///
/// `targets[k]` is the new index of the item that was at `low + k`.
#[derive(Clone, PartialEq, Eq)]
pub struct Reorder {
    low: usize,
    targets: Rc<[usize]>,
}

impl Reorder {
    /// Build a reorder from absolute target indices for `low..low + targets.len()`.
    ///
    /// `targets` must be a non-empty permutation of that range.
    #[must_use]
    pub fn from_targets(low: usize, targets: Vec<usize>) -> Self {
        let reorder = Self {
            low,
            targets: targets.into(),
        };
        debug_assert!(reorder.is_valid(), "reorder is not a bijection: {reorder:?}");
        reorder
    }

    /// Exchange of two positions.
    #[must_use]
    pub fn swap(a: usize, b: usize) -> Self {
        let (low, high) = (a.min(b), a.max(b));
        let targets = (low..=high)
            .map(|i| {
                if i == low {
                    high
                } else if i == high {
                    low
                } else {
                    i
                }
            })
            .collect();
        Self::from_targets(low, targets)
    }

    /// A single item moved from `from` to `to`; items in between shift by one.
    #[must_use]
    pub fn moved(from: usize, to: usize) -> Self {
        let (low, high) = (from.min(to), from.max(to));
        let forward = to >= from;
        let targets = (low..=high)
            .map(|i| {
                if i == from {
                    to
                } else if forward {
                    i - 1
                } else {
                    i + 1
                }
            })
            .collect();
        Self::from_targets(low, targets)
    }

    /// Lowest affected index.
    #[inline]
    #[must_use]
    pub fn low(&self) -> usize {
        self.low
    }

    /// Highest affected index (inclusive).
    #[inline]
    #[must_use]
    pub fn high(&self) -> usize {
        self.low + self.targets.len().saturating_sub(1)
    }

    /// Number of affected positions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the reorder covers no positions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether `index` lies inside the affected range.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.low && index - self.low < self.targets.len()
    }

    /// New index of the item previously at `old`.
    #[must_use]
    pub fn new_index(&self, old: usize) -> usize {
        if self.contains(old) {
            self.targets[old - self.low]
        } else {
            old
        }
    }

    /// Old index of the item now at `new`.
    #[must_use]
    pub fn old_index(&self, new: usize) -> usize {
        if !self.contains(new) {
            return new;
        }
        self.targets
            .iter()
            .position(|&t| t == new)
            .map_or(new, |k| self.low + k)
    }

    /// True when no item actually moves.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.targets
            .iter()
            .enumerate()
            .all(|(k, &t)| t == self.low + k)
    }

    /// Whether `targets` is a permutation of the affected range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.targets.is_empty() {
            return false;
        }
        let mut seen = vec![false; self.targets.len()];
        for &t in self.targets.iter() {
            if !self.contains(t) || seen[t - self.low] {
                return false;
            }
            seen[t - self.low] = true;
        }
        true
    }

    /// The same reorder applied `diff` positions further along.
    #[must_use]
    pub fn translated(&self, diff: isize) -> Self {
        if diff == 0 {
            return self.clone();
        }
        Self {
            low: self.low.saturating_add_signed(diff),
            targets: self
                .targets
                .iter()
                .map(|t| t.saturating_add_signed(diff))
                .collect(),
        }
    }

    /// Permute `items[low..=high]` in place.
    pub(crate) fn apply_to_vec<T: Clone>(&self, items: &mut [T]) {
        let old: Vec<T> = items[self.low..=self.high()].to_vec();
        for (k, item) in old.into_iter().enumerate() {
            items[self.targets[k]] = item;
        }
    }
}

impl fmt::Debug for Reorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reorder")
            .field("low", &self.low)
            .field("high", &self.high())
            .field("targets", &&*self.targets)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Removal
// ---------------------------------------------------------------------------

/// Notice delivered before items leave a list.
///
/// The items are still present in the list while listeners run.
pub struct RemoveNotice<T> {
    index: usize,
    items: Rc<[T]>,
}

impl<T> RemoveNotice<T> {
    /// Notice for `items` starting at `index`.
    #[must_use]
    pub fn new(index: usize, items: Rc<[T]>) -> Self {
        debug_assert!(!items.is_empty(), "empty removal notice");
        Self { index, items }
    }

    /// First index about to be removed.
    #[must_use]
    pub fn first_index(&self) -> usize {
        self.index
    }

    /// Number of items about to be removed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the notice covers no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items about to be removed, in list order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Convert every item, keeping positions.
    #[must_use]
    pub fn map_items<U>(&self, f: impl FnMut(&T) -> U) -> RemoveNotice<U> {
        RemoveNotice {
            index: self.index,
            items: self.items.iter().map(f).collect(),
        }
    }

    /// Shift the notice by `diff` positions.
    #[must_use]
    pub fn translated(&self, diff: isize) -> Self {
        Self {
            index: self.index.saturating_add_signed(diff),
            items: Rc::clone(&self.items),
        }
    }

    /// The post-removal event for the same items.
    #[must_use]
    pub fn into_removed(self) -> RemovedEvent<T> {
        RemovedEvent {
            index: self.index,
            items: self.items,
        }
    }
}

impl<T> Clone for RemoveNotice<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            items: Rc::clone(&self.items),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RemoveNotice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoveNotice")
            .field("index", &self.index)
            .field("items", &&*self.items)
            .finish()
    }
}

/// Payload of a `Remove` event: where the items were and what they were.
pub struct RemovedEvent<T> {
    index: usize,
    items: Rc<[T]>,
}

impl<T> RemovedEvent<T> {
    /// Event for `items` that used to start at `index`.
    #[must_use]
    pub fn new(index: usize, items: Rc<[T]>) -> Self {
        debug_assert!(!items.is_empty(), "empty removal");
        Self { index, items }
    }

    /// First removed index.
    #[must_use]
    pub fn first_index(&self) -> usize {
        self.index
    }

    /// Last removed index (inclusive).
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.index + self.items.len().saturating_sub(1)
    }

    /// Number of removed items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items were removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `index` was part of the removed range.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.index && index - self.index < self.items.len()
    }

    /// The `offset`-th removed item (relative to `first_index`).
    #[must_use]
    pub fn item(&self, offset: usize) -> Option<&T> {
        self.items.get(offset)
    }

    /// Snapshot of the removed items.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Convert every removed item.
    #[must_use]
    pub fn map_items<U>(&self, f: impl FnMut(&T) -> U) -> RemovedEvent<U> {
        RemovedEvent {
            index: self.index,
            items: self.items.iter().map(f).collect(),
        }
    }

    /// Shift the event by `diff` positions.
    #[must_use]
    pub fn translated(&self, diff: isize) -> Self {
        Self {
            index: self.index.saturating_add_signed(diff),
            items: Rc::clone(&self.items),
        }
    }
}

impl<T> Clone for RemovedEvent<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            items: Rc::clone(&self.items),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RemovedEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovedEvent")
            .field("index", &self.index)
            .field("items", &&*self.items)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ListEvent
// ---------------------------------------------------------------------------

/// One committed structural change of a list.
pub enum ListEvent<T> {
    /// `len` items were inserted at `index`.
    Insert { index: usize, len: usize },
    /// Items were removed.
    Remove(RemovedEvent<T>),
    /// Items in `low..=high` changed value without moving.
    Update { low: usize, high: usize },
    /// Items were permuted inside a range.
    Rearrange(Reorder),
}

impl<T> ListEvent<T> {
    /// Update event over an unordered pair of indices.
    #[must_use]
    pub fn update(a: usize, b: usize) -> Self {
        Self::Update {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Inclusive range of indices the event refers to.
    ///
    /// For `Insert` the range is in post-insert coordinates; for `Remove` it
    /// is in pre-removal coordinates.
    #[must_use]
    pub fn affected_range(&self) -> RangeInclusive<usize> {
        match self {
            Self::Insert { index, len } => *index..=index + len.saturating_sub(1),
            Self::Remove(removed) => removed.first_index()..=removed.last_index(),
            Self::Update { low, high } => *low..=*high,
            Self::Rearrange(reorder) => reorder.low()..=reorder.high(),
        }
    }

    /// Where an item that was at `old` before the event is afterwards.
    ///
    /// `None` when the item was removed.
    #[must_use]
    pub fn new_index(&self, old: usize) -> Option<usize> {
        match self {
            Self::Insert { index, len } => Some(if old >= *index { old + len } else { old }),
            Self::Remove(removed) => {
                if removed.contains(old) {
                    None
                } else if old > removed.last_index() {
                    Some(old - removed.len())
                } else {
                    Some(old)
                }
            }
            Self::Update { .. } => Some(old),
            Self::Rearrange(reorder) => Some(reorder.new_index(old)),
        }
    }

    /// The same event shifted `diff` positions further along.
    #[must_use]
    pub fn translated(&self, diff: isize) -> Self {
        match self {
            Self::Insert { index, len } => Self::Insert {
                index: index.saturating_add_signed(diff),
                len: *len,
            },
            Self::Remove(removed) => Self::Remove(removed.translated(diff)),
            Self::Update { low, high } => Self::Update {
                low: low.saturating_add_signed(diff),
                high: high.saturating_add_signed(diff),
            },
            Self::Rearrange(reorder) => Self::Rearrange(reorder.translated(diff)),
        }
    }

    /// Convert the removed-items snapshot (the only item payload).
    #[must_use]
    pub fn map_items<U>(&self, f: impl FnMut(&T) -> U) -> ListEvent<U> {
        match self {
            Self::Insert { index, len } => ListEvent::Insert {
                index: *index,
                len: *len,
            },
            Self::Remove(removed) => ListEvent::Remove(removed.map_items(f)),
            Self::Update { low, high } => ListEvent::Update {
                low: *low,
                high: *high,
            },
            Self::Rearrange(reorder) => ListEvent::Rearrange(reorder.clone()),
        }
    }

    /// Replay the event onto a plain vector mirroring `source`.
    ///
    /// `source` must already reflect the event; inserted and updated values
    /// are read from it.
    pub fn apply_to(&self, mirror: &mut Vec<T>, source: &dyn ListModel<T>)
    where
        T: Clone,
    {
        match self {
            Self::Insert { index, len } => {
                let fresh: Vec<T> = (*index..index + len).filter_map(|i| source.get(i)).collect();
                mirror.splice(*index..*index, fresh);
            }
            Self::Remove(removed) => {
                let end = (removed.first_index() + removed.len()).min(mirror.len());
                mirror.drain(removed.first_index().min(end)..end);
            }
            Self::Update { low, high } => {
                for i in *low..=*high {
                    if let (Some(slot), Some(value)) = (mirror.get_mut(i), source.get(i)) {
                        *slot = value;
                    }
                }
            }
            Self::Rearrange(reorder) => {
                if reorder.high() < mirror.len() {
                    reorder.apply_to_vec(mirror);
                }
            }
        }
    }
}

impl<T> Clone for ListEvent<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Insert { index, len } => Self::Insert {
                index: *index,
                len: *len,
            },
            Self::Remove(removed) => Self::Remove(removed.clone()),
            Self::Update { low, high } => Self::Update {
                low: *low,
                high: *high,
            },
            Self::Rearrange(reorder) => Self::Rearrange(reorder.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ListEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert { index, len } => f
                .debug_struct("Insert")
                .field("index", index)
                .field("len", len)
                .finish(),
            Self::Remove(removed) => f.debug_tuple("Remove").field(removed).finish(),
            Self::Update { low, high } => f
                .debug_struct("Update")
                .field("low", low)
                .field("high", high)
                .finish(),
            Self::Rearrange(reorder) => f.debug_tuple("Rearrange").field(reorder).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_maps_both_ends() {
        let r = Reorder::swap(5, 2);
        assert_eq!((r.low(), r.high()), (2, 5));
        assert_eq!(r.new_index(2), 5);
        assert_eq!(r.new_index(5), 2);
        assert_eq!(r.new_index(3), 3);
        assert_eq!(r.new_index(9), 9);
        assert!(r.is_valid());
    }

    #[test]
    fn move_forward_and_backward() {
        let fwd = Reorder::moved(1, 4);
        assert_eq!(fwd.new_index(1), 4);
        assert_eq!(fwd.new_index(2), 1);
        assert_eq!(fwd.new_index(4), 3);

        let back = Reorder::moved(4, 1);
        assert_eq!(back.new_index(4), 1);
        assert_eq!(back.new_index(1), 2);
        assert_eq!(back.new_index(3), 4);
        assert_eq!(back.old_index(1), 4);
    }

    #[test]
    fn translation_shifts_range_and_targets() {
        let r = Reorder::swap(0, 2).translated(10);
        assert_eq!((r.low(), r.high()), (10, 12));
        assert_eq!(r.new_index(10), 12);
        assert_eq!(r.new_index(0), 0);
    }

    #[test]
    fn identity_detection() {
        assert!(Reorder::from_targets(3, vec![3, 4, 5]).is_identity());
        assert!(!Reorder::swap(3, 4).is_identity());
    }

    #[test]
    fn invalid_targets_are_rejected() {
        let r = Reorder {
            low: 0,
            targets: vec![0, 0].into(),
        };
        assert!(!r.is_valid());
    }

    #[test]
    fn event_new_index() {
        let insert: ListEvent<char> = ListEvent::Insert { index: 2, len: 3 };
        assert_eq!(insert.new_index(1), Some(1));
        assert_eq!(insert.new_index(2), Some(5));

        let remove: ListEvent<char> = ListEvent::Remove(RemovedEvent::new(1, vec!['a', 'b'].into()));
        assert_eq!(remove.new_index(0), Some(0));
        assert_eq!(remove.new_index(2), None);
        assert_eq!(remove.new_index(3), Some(1));
    }

    #[test]
    fn map_items_converts_removed_snapshot() {
        let remove: ListEvent<i32> = ListEvent::Remove(RemovedEvent::new(0, vec![1, 2].into()));
        match remove.map_items(|v| v * 10) {
            ListEvent::Remove(removed) => assert_eq!(removed.items(), &[10, 20]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn notice_becomes_removed_event() {
        let notice = RemoveNotice::new(4, vec!["x"].into());
        let removed = notice.translated(2).into_removed();
        assert_eq!(removed.first_index(), 6);
        assert_eq!(removed.last_index(), 6);
        assert_eq!(removed.item(0), Some(&"x"));
    }

    #[test]
    fn update_normalizes_bounds() {
        let ev: ListEvent<u8> = ListEvent::update(7, 3);
        assert_eq!(ev.affected_range(), 3..=7);
    }
}
