#![forbid(unsafe_code)]

//! Deduplicating view of a source list.
//!
//! # Design
//!
//! [`UniqueList<T>`] shows every distinct source value once, at the position
//! of its first occurrence. Each entry remembers the source index of that
//! occurrence; a hash map from value to that index answers "is this value
//! already shown" in O(1). When the first occurrence moves or disappears the
//! entry is re-pointed to the next surviving duplicate, which may change the
//! visible order.
//!
//! # Invariants
//!
//! 1. Each distinct source value appears exactly once.
//! 2. Entries are ordered by strictly increasing source index, and each
//!    entry's index is the lowest index holding its value.
//! 3. A re-point that leaves the visible order unchanged fires nothing.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use tracing::{trace, warn};

use crate::dispatch::Subscription;
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemovedEvent, Reorder};
use crate::model::{EventCallback, ListModel, PreviewCallback, SharedList};
use crate::order_list::OrderList;

#[derive(Debug, Clone)]
struct UniqueEntry<T> {
    item: T,
    source_index: usize,
}

struct UniqueState<T> {
    source: SharedList<T>,
    image: OrderList<UniqueEntry<T>>,
    first_seen: RefCell<AHashMap<T, usize>>,
    subscription: RefCell<Option<Subscription>>,
}

/// Distinct source values in first-occurrence order.
///
/// Cloning a `UniqueList` creates a new handle to the **same** view.
pub struct UniqueList<T> {
    state: Rc<UniqueState<T>>,
}

impl<T> Clone for UniqueList<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + Eq + Hash + fmt::Debug + 'static> fmt::Debug for UniqueList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueList")
            .field("items", &ListModel::to_vec(self))
            .finish()
    }
}

/// First occurrence of every distinct value, in source order.
fn first_occurrences<T: Clone + Eq + Hash>(source: &dyn ListModel<T>) -> Vec<UniqueEntry<T>> {
    let mut seen = AHashSet::new();
    (0..source.len())
        .filter_map(|i| source.get(i).map(|item| (i, item)))
        .filter(|(_, item)| seen.insert(item.clone()))
        .map(|(source_index, item)| UniqueEntry { item, source_index })
        .collect()
}

impl<T: Clone + Eq + Hash + 'static> UniqueList<T> {
    pub fn new(source: impl ListModel<T> + 'static) -> Self {
        let source: SharedList<T> = Rc::new(source);
        let entries = first_occurrences(&*source);
        let list = Self {
            state: Rc::new(UniqueState {
                source,
                image: OrderList::from_vec(entries),
                first_seen: RefCell::new(AHashMap::new()),
                subscription: RefCell::new(None),
            }),
        };
        list.state.reindex();
        let weak: Weak<UniqueState<T>> = Rc::downgrade(&list.state);
        let subscription = list.state.source.observe(Box::new(move |event| match weak.upgrade() {
            Some(state) => state.on_source_event(event),
            None => Ok(()),
        }));
        *list.state.subscription.borrow_mut() = Some(subscription);
        list
    }

    /// Source index of the occurrence shown at `index`.
    #[must_use]
    pub fn source_index_of(&self, index: usize) -> Option<usize> {
        self.state.image.with(index, |entry| entry.source_index)
    }

    #[must_use]
    pub fn source(&self) -> SharedList<T> {
        Rc::clone(&self.state.source)
    }

    /// Rebuild from the source, firing the minimal set of events.
    pub fn resynch(&self) -> Result<()> {
        self.state.resynch()
    }

    pub fn detach(&self) {
        self.state.subscription.borrow_mut().take();
    }

    /// Verify the view against a fresh scan of the source.
    pub fn check_consistent(&self) -> Result<()> {
        let expected = first_occurrences(&*self.state.source);
        let actual: Vec<(T, usize)> = self.state.image.with_items(|entries| {
            entries
                .iter()
                .map(|e| (e.item.clone(), e.source_index))
                .collect()
        });
        let expected: Vec<(T, usize)> = expected.into_iter().map(|e| (e.item, e.source_index)).collect();
        if actual != expected {
            return Err(ModelError::inconsistent(format!(
                "unique view holds {} entries, source has {} distinct values",
                actual.len(),
                expected.len()
            )));
        }
        if self.state.first_seen.borrow().len() != actual.len() {
            return Err(ModelError::inconsistent("value index out of date"));
        }
        Ok(())
    }
}

impl<T: Clone + Eq + Hash + 'static> UniqueState<T> {
    fn reindex(&self) {
        let mut first_seen = self.first_seen.borrow_mut();
        first_seen.clear();
        self.image.with_items(|entries| {
            for entry in entries {
                first_seen.insert(entry.item.clone(), entry.source_index);
            }
        });
    }

    fn position_of(&self, source_index: usize) -> usize {
        self.image
            .with_items(|entries| entries.partition_point(|e| e.source_index < source_index))
    }

    /// Restore source-index order after re-points; one `Rearrange` at most.
    fn restore_order(&self) -> Result<()> {
        self.image
            .ensure_sorted(|a, b| a.source_index.cmp(&b.source_index))
            .map(drop)
    }

    fn on_source_event(&self, event: &ListEvent<T>) -> ListenerResult {
        let result = match event {
            ListEvent::Insert { index, len } => self.on_insert(*index, *len),
            ListEvent::Remove(removed) => self.on_remove(removed),
            ListEvent::Update { low, high } => self.on_update(*low, *high),
            ListEvent::Rearrange(reorder) => self.on_rearrange(reorder),
        };
        self.reindex();
        result
    }

    fn on_insert(&self, index: usize, len: usize) -> ListenerResult {
        let start = self.position_of(index);
        self.image.edit_silently(|entries| {
            for entry in entries.iter_mut().skip(start) {
                entry.source_index += len;
            }
        });
        self.reindex();

        let mut repointed: AHashMap<T, usize> = AHashMap::new();
        let mut fresh: Vec<UniqueEntry<T>> = Vec::new();
        let mut fresh_seen: AHashSet<T> = AHashSet::new();
        {
            let first_seen = self.first_seen.borrow();
            for i in index..index + len {
                let Some(item) = self.source.get(i) else {
                    continue;
                };
                match first_seen.get(&item) {
                    Some(&shown) if shown > i => {
                        repointed.entry(item).or_insert(i);
                    }
                    Some(_) => {}
                    None => {
                        if fresh_seen.insert(item.clone()) {
                            fresh.push(UniqueEntry { item, source_index: i });
                        }
                    }
                }
            }
        }

        let mut errors = FirstError::new();
        if !repointed.is_empty() {
            self.image.edit_silently(|entries| {
                for entry in entries.iter_mut() {
                    if let Some(&i) = repointed.get(&entry.item) {
                        entry.source_index = i;
                    }
                }
            });
            errors.record(self.restore_order());
        }
        for entry in fresh {
            let position = self.position_of(entry.source_index);
            errors.record(self.image.insert(position, entry));
        }
        errors.finish()
    }

    fn on_remove(&self, removed: &RemovedEvent<T>) -> ListenerResult {
        let first = removed.first_index();
        let len = removed.len();
        let source_len = self.source.len();
        let lost: Vec<(usize, T)> = self.image.with_items(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| removed.contains(e.source_index))
                .map(|(pos, e)| (pos, e.item.clone()))
                .collect()
        });
        let survivors: Vec<(usize, Option<usize>)> = lost
            .iter()
            .map(|(pos, item)| (*pos, self.source.index_of_in(item, first, source_len)))
            .collect();

        let mut doomed = Vec::new();
        let mut moved = false;
        self.image.edit_silently(|entries| {
            for entry in entries.iter_mut() {
                if entry.source_index > removed.last_index() {
                    entry.source_index -= len;
                }
            }
            for (pos, survivor) in &survivors {
                match survivor {
                    Some(i) => {
                        entries[*pos].source_index = *i;
                        moved = true;
                    }
                    None => doomed.push(*pos),
                }
            }
        });

        let mut errors = FirstError::new();
        errors.record(self.image.remove_indices(&doomed));
        if moved {
            errors.record(self.restore_order());
        }
        errors.finish()
    }

    fn on_rearrange(&self, reorder: &Reorder) -> ListenerResult {
        let (low, high) = (reorder.low(), reorder.high());
        let inside: Vec<(usize, T)> = self.image.with_items(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| reorder.contains(e.source_index))
                .map(|(pos, e)| (pos, e.item.clone()))
                .collect()
        });
        if inside.is_empty() {
            trace!(low, high, "rearranged range holds only later duplicates");
            return Ok(());
        }
        let targets: Vec<(usize, Option<usize>)> = inside
            .iter()
            .map(|(pos, item)| (*pos, self.source.index_of_in(item, low, high + 1)))
            .collect();
        self.image.edit_silently(|entries| {
            for (pos, target) in &targets {
                match target {
                    Some(i) => entries[*pos].source_index = *i,
                    None => warn!(position = *pos, "value left a rearranged range"),
                }
            }
        });
        self.restore_order()
    }

    fn on_update(&self, low: usize, high: usize) -> ListenerResult {
        let mut errors = FirstError::new();
        errors.record(self.resynch());
        let start = self.position_of(low);
        let end = self.position_of(high + 1);
        if start < end {
            let fresh: Vec<Option<T>> = self.image.with_items(|entries| {
                entries[start..end]
                    .iter()
                    .map(|e| e.source_index)
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .map(|i| self.source.get(i))
            .collect();
            self.image.edit_silently(|entries| {
                for (entry, item) in entries[start..end].iter_mut().zip(fresh) {
                    if let Some(item) = item {
                        entry.item = item;
                    }
                }
            });
            errors.record(self.image.update_range(start, end - 1));
        }
        errors.finish()
    }

    fn resynch(&self) -> Result<()> {
        let expected = first_occurrences(&*self.source);
        let wanted: AHashMap<T, usize> = expected
            .iter()
            .map(|e| (e.item.clone(), e.source_index))
            .collect();
        let mut errors = FirstError::new();

        let doomed: Vec<usize> = self.image.with_items(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !wanted.contains_key(&e.item))
                .map(|(pos, _)| pos)
                .collect()
        });
        errors.record(self.image.remove_indices(&doomed));

        let mut moved = false;
        self.image.edit_silently(|entries| {
            for entry in entries.iter_mut() {
                if let Some(&i) = wanted.get(&entry.item) {
                    if entry.source_index != i {
                        entry.source_index = i;
                        moved = true;
                    }
                }
            }
        });
        if moved {
            errors.record(self.restore_order());
        }

        self.reindex();
        let missing: Vec<UniqueEntry<T>> = {
            let first_seen = self.first_seen.borrow();
            expected
                .into_iter()
                .filter(|e| !first_seen.contains_key(&e.item))
                .collect()
        };
        for entry in missing {
            let position = self.position_of(entry.source_index);
            errors.record(self.image.insert(position, entry));
        }
        self.reindex();
        errors.finish()
    }
}

impl<T: Clone + Eq + Hash + 'static> ListModel<T> for UniqueList<T> {
    fn len(&self) -> usize {
        self.state.image.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.state.image.with(index, |entry| entry.item.clone())
    }

    fn observe(&self, mut listener: EventCallback<T>) -> Subscription {
        self.state
            .image
            .observe(Box::new(move |event| listener(&event.map_items(|e| e.item.clone()))))
    }

    fn observe_removal_preview(&self, mut listener: PreviewCallback<T>) -> Subscription {
        self.state
            .image
            .observe_removal_preview(Box::new(move |notice| listener(&notice.map_items(|e| e.item.clone()))))
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        self.state.image.force_update_at(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Rc<RefCell<Vec<ListEvent<char>>>>;

    fn record(list: &UniqueList<char>) -> (Log, Subscription) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = list.listen(move |e| {
            sink.borrow_mut().push(e.clone());
            Ok(())
        });
        (log, sub)
    }

    fn view(s: &str) -> (OrderList<char>, UniqueList<char>) {
        let source = OrderList::from_vec(s.chars().collect());
        let unique = UniqueList::new(source.clone());
        (source, unique)
    }

    fn text(list: &UniqueList<char>) -> String {
        ListModel::to_vec(list).into_iter().collect()
    }

    #[test]
    fn dedup_scenario() {
        let (source, unique) = view("XYXZ");
        assert_eq!(text(&unique), "XYZ");
        let (log, _sub) = record(&unique);

        source.remove_at(0).unwrap();
        assert_eq!(text(&unique), "YXZ");
        assert_eq!(unique.source_index_of(1), Some(1));
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0], ListEvent::Rearrange(_)));
        unique.check_consistent().unwrap();
    }

    #[test]
    fn repoint_without_order_change_is_silent() {
        let (source, unique) = view("XXY");
        let (log, _sub) = record(&unique);
        source.remove_at(0).unwrap();
        assert_eq!(text(&unique), "XY");
        assert!(log.borrow().is_empty());
        unique.check_consistent().unwrap();
    }

    #[test]
    fn removal_of_last_occurrence_removes_value() {
        let (source, unique) = view("ABC");
        let (log, _sub) = record(&unique);
        source.remove_range(0, 2).unwrap();
        assert_eq!(text(&unique), "C");
        assert_eq!(log.borrow().len(), 1);
        unique.check_consistent().unwrap();
    }

    #[test]
    fn insert_new_and_duplicate_values() {
        let (source, unique) = view("AB");
        let (log, _sub) = record(&unique);
        source.insert_all(1, vec!['C', 'A', 'C']).unwrap();
        assert_eq!(text(&unique), "ACB");
        assert_eq!(log.borrow().len(), 1);
        unique.check_consistent().unwrap();
    }

    #[test]
    fn insert_earlier_duplicate_moves_value() {
        let (source, unique) = view("ABC");
        let (log, _sub) = record(&unique);
        source.insert(0, 'C').unwrap();
        assert_eq!(text(&unique), "CAB");
        assert!(matches!(log.borrow()[0], ListEvent::Rearrange(_)));
        unique.check_consistent().unwrap();
    }

    #[test]
    fn rearrange_repoints_to_lowest_occurrence_in_range() {
        let (source, unique) = view("ABAB");
        source.swap(0, 1).unwrap();
        assert_eq!(text(&unique), "BA");
        unique.check_consistent().unwrap();
        // Range 2..=3 only holds later duplicates.
        let (log, _sub) = record(&unique);
        source.swap(2, 3).unwrap();
        assert!(log.borrow().is_empty());
        unique.check_consistent().unwrap();
    }

    #[test]
    fn update_resynchs_membership() {
        let (source, unique) = view("ABA");
        source.replace_at(0, 'C').unwrap();
        assert_eq!(text(&unique), "CBA");
        unique.check_consistent().unwrap();
        source.replace_at(2, 'B').unwrap();
        assert_eq!(text(&unique), "CB");
        unique.check_consistent().unwrap();
    }

    #[test]
    fn resynch_twice_is_quiet() {
        let (_source, unique) = view("ABBA");
        let (log, _sub) = record(&unique);
        unique.resynch().unwrap();
        unique.resynch().unwrap();
        assert!(log.borrow().is_empty());
    }
}
