#![forbid(unsafe_code)]

//! Sorted view of a source list.
//!
//! # Design
//!
//! [`SortedList<T>`] keeps one entry per source item, ordered by the
//! comparator with the source index as tie-breaker, so the order is total and
//! equal items keep their source order. Inserts are placed by binary search;
//! updated entries that broke the order are moved back into place by binary
//! search, and rearranges do the same for the span they touched.
//!
//! # Invariants
//!
//! 1. Entries are non-decreasing under `(comparator, source_index)`.
//! 2. There is exactly one entry per source index.
//! 3. `sort_or_update` never fires `Rearrange` over a range that is already
//!    ordered.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dispatch::Subscription;
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemovedEvent, Reorder};
use crate::model::{EventCallback, ListModel, PreviewCallback, SharedList};
use crate::order_list::OrderList;

/// Ordering used by [`SortedList`].
pub type Comparator<T> = Rc<dyn Fn(&T, &T) -> Ordering>;

#[derive(Debug, Clone)]
struct SortEntry<T> {
    item: T,
    source_index: usize,
}

struct SortedState<T> {
    source: SharedList<T>,
    comparator: RefCell<Comparator<T>>,
    image: OrderList<SortEntry<T>>,
    subscription: RefCell<Option<Subscription>>,
}

/// Source items in comparator order.
///
/// Cloning a `SortedList` creates a new handle to the **same** view.
pub struct SortedList<T> {
    state: Rc<SortedState<T>>,
}

impl<T> Clone for SortedList<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for SortedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedList")
            .field("items", &ListModel::to_vec(self))
            .finish()
    }
}

impl<T: Clone + 'static> SortedList<T> {
    pub fn new(source: impl ListModel<T> + 'static, comparator: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        let source: SharedList<T> = Rc::new(source);
        let comparator: Comparator<T> = Rc::new(comparator);
        let mut entries: Vec<SortEntry<T>> = (0..source.len())
            .filter_map(|i| source.get(i).map(|item| SortEntry { item, source_index: i }))
            .collect();
        entries.sort_by(|a, b| comparator(&a.item, &b.item).then(a.source_index.cmp(&b.source_index)));
        let list = Self {
            state: Rc::new(SortedState {
                source,
                comparator: RefCell::new(comparator),
                image: OrderList::from_vec(entries),
                subscription: RefCell::new(None),
            }),
        };
        let weak: Weak<SortedState<T>> = Rc::downgrade(&list.state);
        let subscription = list.state.source.observe(Box::new(move |event| match weak.upgrade() {
            Some(state) => state.on_source_event(event),
            None => Ok(()),
        }));
        *list.state.subscription.borrow_mut() = Some(subscription);
        list
    }

    #[must_use]
    pub fn comparator(&self) -> Comparator<T> {
        Rc::clone(&self.state.comparator.borrow())
    }

    /// Switch to a new order; sorts only if the current order violates it.
    pub fn set_comparator(&self, comparator: impl Fn(&T, &T) -> Ordering + 'static) -> Result<()> {
        *self.state.comparator.borrow_mut() = Rc::new(comparator);
        self.state.image.ensure_sorted(self.state.entry_order()).map(drop)
    }

    /// Source index of the item at `index`.
    #[must_use]
    pub fn source_index_of(&self, index: usize) -> Option<usize> {
        self.state.image.with(index, |entry| entry.source_index)
    }

    #[must_use]
    pub fn source(&self) -> SharedList<T> {
        Rc::clone(&self.state.source)
    }

    pub fn detach(&self) {
        self.state.subscription.borrow_mut().take();
    }

    /// Verify order and coverage against the source.
    pub fn check_consistent(&self) -> Result<()>
    where
        T: PartialEq,
    {
        let state = &self.state;
        if state.image.len() != state.source.len() {
            return Err(ModelError::inconsistent(format!(
                "sorted view holds {} entries for {} source items",
                state.image.len(),
                state.source.len()
            )));
        }
        if !state.image.is_sorted_by(state.entry_order()) {
            return Err(ModelError::inconsistent("sorted view is out of order"));
        }
        let mut seen = vec![false; state.source.len()];
        let problem = state.image.with_items(|entries| {
            entries.iter().enumerate().find_map(|(pos, entry)| {
                let duplicate = seen.get(entry.source_index).copied().unwrap_or(true);
                if let Some(flag) = seen.get_mut(entry.source_index) {
                    *flag = true;
                }
                let stale = state.source.get(entry.source_index).as_ref() != Some(&entry.item);
                (duplicate || stale).then(|| format!("entry {pos} does not match source {}", entry.source_index))
            })
        });
        match problem {
            Some(message) => Err(ModelError::inconsistent(message)),
            None => Ok(()),
        }
    }
}

impl<T: Clone + 'static> SortedState<T> {
    fn entry_order(&self) -> impl Fn(&SortEntry<T>, &SortEntry<T>) -> Ordering + 'static {
        let comparator = Rc::clone(&self.comparator.borrow());
        move |a, b| comparator(&a.item, &b.item).then(a.source_index.cmp(&b.source_index))
    }

    fn on_source_event(&self, event: &ListEvent<T>) -> ListenerResult {
        match event {
            ListEvent::Insert { index, len } => self.on_insert(*index, *len),
            ListEvent::Remove(removed) => self.on_remove(removed),
            ListEvent::Update { low, high } => self.on_update(*low, *high),
            ListEvent::Rearrange(reorder) => self.on_rearrange(reorder),
        }
    }

    fn on_insert(&self, index: usize, len: usize) -> ListenerResult {
        self.image.edit_silently(|entries| {
            for entry in entries.iter_mut().filter(|e| e.source_index >= index) {
                entry.source_index += len;
            }
        });
        let order = self.entry_order();
        let mut errors = FirstError::new();
        for i in index..index + len {
            let Some(item) = self.source.get(i) else {
                continue;
            };
            let entry = SortEntry { item, source_index: i };
            let position = self.image.find_place(&entry, &order);
            errors.record(self.image.insert(position, entry));
        }
        errors.finish()
    }

    fn on_remove(&self, removed: &RemovedEvent<T>) -> ListenerResult {
        let len = removed.len();
        let doomed: Vec<usize> = self.image.edit_silently(|entries| {
            let mut doomed = Vec::with_capacity(len);
            for (pos, entry) in entries.iter_mut().enumerate() {
                if removed.contains(entry.source_index) {
                    doomed.push(pos);
                } else if entry.source_index > removed.last_index() {
                    entry.source_index -= len;
                }
            }
            doomed
        });
        self.image.remove_indices(&doomed)
    }

    fn on_rearrange(&self, reorder: &Reorder) -> ListenerResult {
        let touched: Vec<usize> = self.image.edit_silently(|entries| {
            let mut touched = Vec::new();
            for (pos, entry) in entries.iter_mut().enumerate() {
                if reorder.contains(entry.source_index) {
                    entry.source_index = reorder.new_index(entry.source_index);
                    touched.push(pos);
                }
            }
            touched
        });
        match (touched.first(), touched.last()) {
            (Some(&low), Some(&high)) => self.image.sort_or_update(low, high, self.entry_order()),
            _ => Ok(()),
        }
    }

    fn on_update(&self, low: usize, high: usize) -> ListenerResult {
        let targets: Vec<(usize, usize)> = self.image.with_items(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| (low..=high).contains(&e.source_index))
                .map(|(pos, e)| (pos, e.source_index))
                .collect()
        });
        if targets.is_empty() {
            return Ok(());
        }
        let fresh: Vec<(usize, Option<T>)> = targets
            .iter()
            .map(|&(pos, si)| (pos, self.source.get(si)))
            .collect();
        self.image.edit_silently(|entries| {
            for (pos, item) in fresh {
                if let Some(item) = item {
                    entries[pos].item = item;
                }
            }
        });

        let order = self.entry_order();
        let mut errors = FirstError::new();
        let moved: Vec<usize> = targets.iter().map(|&(pos, _)| pos).collect();
        let in_place = moved
            .iter()
            .all(|&pos| self.image.is_range_sorted_by(pos, pos, &order));
        if !in_place {
            errors.record(self.image.reposition(&moved, &order));
        }
        let positions: Vec<usize> = self.image.with_items(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| (low..=high).contains(&e.source_index))
                .map(|(pos, _)| pos)
                .collect()
        });
        if let (Some(&first), Some(&last)) = (positions.first(), positions.last()) {
            errors.record(self.image.update_range(first, last));
        }
        errors.finish()
    }
}

impl<T: Clone + 'static> ListModel<T> for SortedList<T> {
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

    type Log = Rc<RefCell<Vec<ListEvent<i32>>>>;

    fn record(list: &SortedList<i32>) -> (Log, Subscription) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = list.listen(move |e| {
            sink.borrow_mut().push(e.clone());
            Ok(())
        });
        (log, sub)
    }

    fn view(items: Vec<i32>) -> (OrderList<i32>, SortedList<i32>) {
        let source = OrderList::from_vec(items);
        let sorted = SortedList::new(source.clone(), i32::cmp);
        (source, sorted)
    }

    #[test]
    fn initial_order() {
        let (_source, sorted) = view(vec![3, 1, 2]);
        assert_eq!(sorted.to_vec(), vec![1, 2, 3]);
        assert_eq!(sorted.source_index_of(0), Some(1));
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn inserts_land_in_order() {
        let (source, sorted) = view(vec![5, 1]);
        let (log, _sub) = record(&sorted);
        source.insert_all(1, vec![3, 0]).unwrap();
        assert_eq!(sorted.to_vec(), vec![0, 1, 3, 5]);
        assert_eq!(log.borrow().len(), 2);
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn removals_coalesce_adjacent_entries() {
        let (source, sorted) = view(vec![2, 9, 1, 8]);
        let (log, _sub) = record(&sorted);
        source.remove_range(0, 3).unwrap();
        assert_eq!(sorted.to_vec(), vec![8]);
        // 1 and 2 are adjacent in the view, 9 is separate.
        assert_eq!(log.borrow().len(), 2);
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn update_without_order_change_fires_update() {
        let (source, sorted) = view(vec![10, 20, 30]);
        let (log, _sub) = record(&sorted);
        source.replace_at(1, 21).unwrap();
        assert_eq!(sorted.to_vec(), vec![10, 21, 30]);
        assert_eq!(log.borrow().len(), 1);
        assert!(matches!(log.borrow()[0], ListEvent::Update { low: 1, high: 1 }));
    }

    #[test]
    fn update_breaking_order_rearranges_then_updates() {
        let (source, sorted) = view(vec![10, 20, 30]);
        let (log, _sub) = record(&sorted);
        source.replace_at(0, 40).unwrap();
        assert_eq!(sorted.to_vec(), vec![20, 30, 40]);
        let log = log.borrow();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], ListEvent::Rearrange(_)));
        assert!(matches!(log[1], ListEvent::Update { low: 2, high: 2 }));
    }

    #[test]
    fn update_moves_only_the_span_it_crosses() {
        let (source, sorted) = view((0..100).map(|v| v * 10).collect());
        let (log, _sub) = record(&sorted);
        source.replace_at_silent(50, 525).unwrap();
        source.replace_at_silent(51, 512).unwrap();
        source.update_range(50, 51).unwrap();
        let log = log.borrow();
        match &log[0] {
            ListEvent::Rearrange(reorder) => {
                assert_eq!((reorder.low(), reorder.high()), (50, 52));
                assert_eq!(reorder.new_index(50), 52);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(log[1], ListEvent::Update { low: 50, high: 52 }));
        assert_eq!(sorted.sub_list(49, 54).unwrap(), vec![490, 512, 520, 525, 530]);
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn rearrange_of_distinct_items_only_updates() {
        let (source, sorted) = view(vec![1, 2, 3]);
        let (log, _sub) = record(&sorted);
        source.swap(0, 2).unwrap();
        assert_eq!(sorted.to_vec(), vec![1, 2, 3]);
        assert!(log.borrow().iter().all(|e| matches!(e, ListEvent::Update { .. })));
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn rearrange_of_equal_items_keeps_source_order() {
        let source = OrderList::from_vec(vec![(1, 'a'), (1, 'b'), (0, 'c')]);
        let sorted = SortedList::new(source.clone(), |x: &(i32, char), y: &(i32, char)| x.0.cmp(&y.0));
        assert_eq!(sorted.to_vec(), vec![(0, 'c'), (1, 'a'), (1, 'b')]);
        source.swap(0, 1).unwrap();
        assert_eq!(sorted.to_vec(), vec![(0, 'c'), (1, 'b'), (1, 'a')]);
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn set_comparator_resorts_only_when_needed() {
        let (_source, sorted) = view(vec![1, 2, 3]);
        let (log, _sub) = record(&sorted);
        sorted.set_comparator(|a: &i32, b: &i32| a.cmp(b)).unwrap();
        assert!(log.borrow().is_empty());
        sorted.set_comparator(|a: &i32, b: &i32| b.cmp(a)).unwrap();
        assert_eq!(sorted.to_vec(), vec![3, 2, 1]);
        assert_eq!(log.borrow().len(), 1);
        sorted.check_consistent().unwrap();
    }

    #[test]
    fn detach_stops_tracking() {
        let (source, sorted) = view(vec![1]);
        sorted.detach();
        source.push(0).unwrap();
        assert_eq!(sorted.to_vec(), vec![1]);
    }
}
