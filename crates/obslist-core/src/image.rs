#![forbid(unsafe_code)]

//! Index-mapping decorator: filter and projection over a source list.
//!
//! # Design
//!
//! [`ImageList<S, D>`] keeps an "image" of its source: an [`OrderList`] of
//! [`ImageEntry`] values, one per accepted source item, each remembering the
//! source item, its derived value and its current source index. Source events
//! are translated into image mutations, and the image's own events are what
//! observers of the decorator receive (with entries projected to `D`).
//!
//! Membership is decided by a predicate, the derived value by a converter.
//! Decorators whose membership depends on item values set
//! `refilter_on_update` so an `Update` of the source first re-checks the
//! predicate over the updated range.
//!
//! # Invariants
//!
//! 1. Entries appear in strictly increasing `source_index` order.
//! 2. `entry.source_item` equals `source.get(entry.source_index)`.
//! 3. After [`resynch`](ImageList::resynch) the image holds exactly the
//!    accepted source items; a second `resynch` with no source change fires
//!    nothing.
//!
//! # Failure Modes
//!
//! - **Source dropped**: the decorator holds the source alive, so this only
//!   happens after [`detach`](ImageList::detach), which stops all tracking.
//! - **Predicate reads the image**: allowed; the image storage is never
//!   borrowed while user closures run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::dispatch::Subscription;
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemovedEvent, Reorder};
use crate::model::{EventCallback, ListModel, PreviewCallback, SharedList};
use crate::order_list::{OrderList, runs};

/// Inserted runs shorter than this fire one `Insert` per item.
pub const GROUP_THRESHOLD: usize = 3;

/// One accepted source item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry<S, D> {
    pub source_item: S,
    pub derived: D,
    pub source_index: usize,
}

type Predicate<S> = Rc<dyn Fn(&S) -> bool>;
type Converter<S, D> = Rc<dyn Fn(&S) -> D>;

struct ImageState<S, D> {
    source: SharedList<S>,
    predicate: RefCell<Predicate<S>>,
    converter: RefCell<Converter<S, D>>,
    refilter_on_update: Cell<bool>,
    image: OrderList<ImageEntry<S, D>>,
    subscription: RefCell<Option<Subscription>>,
}

/// Filtered and converted view of a source list.
///
/// Cloning an `ImageList` creates a new handle to the **same** view.
pub struct ImageList<S, D> {
    state: Rc<ImageState<S, D>>,
}

impl<S, D> Clone for ImageList<S, D> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<S: Clone + 'static, D: Clone + fmt::Debug + 'static> fmt::Debug for ImageList<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageList")
            .field("derived", &self.to_vec())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<S: Clone + 'static> ImageList<S, S> {
    /// Items of `source` accepted by `predicate`, unchanged.
    pub fn filtered(source: impl ListModel<S> + 'static, predicate: impl Fn(&S) -> bool + 'static) -> Self {
        Self::new(source, predicate, S::clone)
    }
}

impl<S: Clone + 'static, D: Clone + 'static> ImageList<S, D> {
    /// Every item of `source`, converted.
    ///
    /// Membership never changes, so source updates only reconvert.
    pub fn converted(source: impl ListModel<S> + 'static, converter: impl Fn(&S) -> D + 'static) -> Self {
        let list = Self::attached(Rc::new(source), Rc::new(|_: &S| true), Rc::new(converter));
        list.state.refilter_on_update.set(false);
        list
    }

    /// Accepted items of `source`, converted.
    pub fn new(
        source: impl ListModel<S> + 'static,
        predicate: impl Fn(&S) -> bool + 'static,
        converter: impl Fn(&S) -> D + 'static,
    ) -> Self {
        Self::attached(Rc::new(source), Rc::new(predicate), Rc::new(converter))
    }

    /// A view that does not subscribe to `source`; its owner forwards source
    /// events through [`apply_source_event`](Self::apply_source_event).
    pub fn driven(
        source: SharedList<S>,
        predicate: impl Fn(&S) -> bool + 'static,
        converter: impl Fn(&S) -> D + 'static,
    ) -> Self {
        Self::build(source, Rc::new(predicate), Rc::new(converter))
    }

    fn attached(source: SharedList<S>, predicate: Predicate<S>, converter: Converter<S, D>) -> Self {
        let list = Self::build(source, predicate, converter);
        let weak: Weak<ImageState<S, D>> = Rc::downgrade(&list.state);
        let subscription = list.state.source.observe(Box::new(move |event| match weak.upgrade() {
            Some(state) => state.on_source_event(event),
            None => Ok(()),
        }));
        *list.state.subscription.borrow_mut() = Some(subscription);
        list
    }

    fn build(source: SharedList<S>, predicate: Predicate<S>, converter: Converter<S, D>) -> Self {
        let entries: Vec<ImageEntry<S, D>> = (0..source.len())
            .filter_map(|i| source.get(i).map(|item| (i, item)))
            .filter(|(_, item)| predicate(item))
            .map(|(i, item)| ImageEntry {
                derived: converter(&item),
                source_item: item,
                source_index: i,
            })
            .collect();
        Self {
            state: Rc::new(ImageState {
                source,
                predicate: RefCell::new(predicate),
                converter: RefCell::new(converter),
                refilter_on_update: Cell::new(true),
                image: OrderList::from_vec(entries),
                subscription: RefCell::new(None),
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.image.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<D> {
        self.state.image.with(index, |entry| entry.derived.clone())
    }

    /// Derived items, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<D> {
        self.state
            .image
            .with_items(|entries| entries.iter().map(|e| e.derived.clone()).collect())
    }

    /// Borrowed access to the image entries.
    pub fn with_entries<R>(&self, f: impl FnOnce(&[ImageEntry<S, D>]) -> R) -> R {
        self.state.image.with_items(f)
    }

    /// Source index of the item at `index`.
    #[must_use]
    pub fn source_index_of(&self, index: usize) -> Option<usize> {
        self.state.image.with(index, |entry| entry.source_index)
    }

    #[must_use]
    pub fn source(&self) -> SharedList<S> {
        Rc::clone(&self.state.source)
    }

    /// Whether the view still follows its source.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state.subscription.borrow().is_some()
    }

    /// Stop following the source. The current content stays as is.
    pub fn detach(&self) {
        self.state.subscription.borrow_mut().take();
    }

    /// Re-check source updates against the predicate.
    pub fn set_refilter_on_update(&self, refilter: bool) {
        self.state.refilter_on_update.set(refilter);
    }

    /// Replace the predicate and bring membership up to date.
    pub fn set_predicate(&self, predicate: impl Fn(&S) -> bool + 'static) -> Result<()> {
        *self.state.predicate.borrow_mut() = Rc::new(predicate);
        self.resynch()
    }

    /// Replace the converter; every derived value is recomputed and updated.
    pub fn set_converter(&self, converter: impl Fn(&S) -> D + 'static) -> Result<()> {
        *self.state.converter.borrow_mut() = Rc::new(converter);
        self.update_all()
    }

    /// Reconvert every entry and fire one `Update` over the image.
    pub fn update_all(&self) -> Result<()> {
        match self.len() {
            0 => Ok(()),
            len => self.state.refresh_positions(0, len),
        }
    }

    /// Reconvert the entry at `index` and report it updated.
    pub fn image_updated(&self, index: usize) -> Result<()> {
        ModelError::check_index(index, self.len())?;
        self.state.refresh_positions(index, index + 1)
    }

    /// Make membership match the predicate over the whole source.
    pub fn resynch(&self) -> Result<()> {
        self.state.resynch_span(0, usize::MAX)
    }

    /// Make membership match the predicate for source indices `low..=high`.
    pub fn resynch_range(&self, low: usize, high: usize) -> Result<()> {
        let (low, high) = (low.min(high), low.max(high));
        self.state.resynch_span(low, high.saturating_add(1))
    }

    /// Feed a source event to a [`driven`](Self::driven) view.
    pub fn apply_source_event(&self, event: &ListEvent<S>) -> ListenerResult {
        self.state.on_source_event(event)
    }

    /// Verify the image against the source.
    pub fn check_consistent(&self) -> Result<()>
    where
        S: PartialEq,
    {
        let state = &self.state;
        let source = &state.source;
        let mut previous: Option<usize> = None;
        let mut count = 0;
        let problem = state.image.with_items(|entries| {
            for (pos, entry) in entries.iter().enumerate() {
                if previous.is_some_and(|p| p >= entry.source_index) {
                    return Some(format!("entry {pos} breaks source order"));
                }
                previous = Some(entry.source_index);
                if source.get(entry.source_index).as_ref() != Some(&entry.source_item) {
                    return Some(format!("entry {pos} does not match source {}", entry.source_index));
                }
            }
            count = entries.len();
            None
        });
        if let Some(message) = problem {
            return Err(ModelError::inconsistent(message));
        }
        let predicate = state.predicate();
        let accepted = (0..source.len())
            .filter_map(|i| source.get(i))
            .filter(|item| predicate(item))
            .count();
        if accepted != count {
            return Err(ModelError::inconsistent(format!(
                "image holds {count} entries but source accepts {accepted}"
            )));
        }
        Ok(())
    }
}

impl<S: Clone + 'static, D: Clone + 'static> ImageState<S, D> {
    fn predicate(&self) -> Predicate<S> {
        Rc::clone(&self.predicate.borrow())
    }

    fn converter(&self) -> Converter<S, D> {
        Rc::clone(&self.converter.borrow())
    }

    fn entry(&self, source_item: S, source_index: usize) -> ImageEntry<S, D> {
        ImageEntry {
            derived: (self.converter())(&source_item),
            source_item,
            source_index,
        }
    }

    /// Position of the first entry with `source_index >= index`.
    fn first_at_or_after(&self, index: usize) -> usize {
        self.image
            .with_items(|entries| entries.partition_point(|e| e.source_index < index))
    }

    fn shift_from(&self, position: usize, diff: isize) {
        self.image.edit_silently(|entries| {
            for entry in entries.iter_mut().skip(position) {
                entry.source_index = entry.source_index.saturating_add_signed(diff);
            }
        });
    }

    fn on_source_event(&self, event: &ListEvent<S>) -> ListenerResult {
        match event {
            ListEvent::Insert { index, len } => self.on_insert(*index, *len),
            ListEvent::Remove(removed) => self.on_remove(removed),
            ListEvent::Update { low, high } => self.on_update(*low, *high),
            ListEvent::Rearrange(reorder) => self.on_rearrange(reorder),
        }
    }

    fn on_insert(&self, index: usize, len: usize) -> ListenerResult {
        let position = self.first_at_or_after(index);
        self.shift_from(position, len as isize);
        let predicate = self.predicate();
        let accepted: Vec<ImageEntry<S, D>> = (index..index + len)
            .filter_map(|i| self.source.get(i).map(|item| (i, item)))
            .filter(|(_, item)| predicate(item))
            .map(|(i, item)| self.entry(item, i))
            .collect();
        if accepted.len() >= GROUP_THRESHOLD {
            return self.image.insert_all(position, accepted);
        }
        let mut errors = FirstError::new();
        for (offset, entry) in accepted.into_iter().enumerate() {
            errors.record(self.image.insert(position + offset, entry));
        }
        errors.finish()
    }

    fn on_remove(&self, removed: &RemovedEvent<S>) -> ListenerResult {
        let start = self.first_at_or_after(removed.first_index());
        let end = self.first_at_or_after(removed.first_index() + removed.len());
        self.shift_from(end, -(removed.len() as isize));
        self.image.remove_range(start, end).map(drop)
    }

    fn on_update(&self, low: usize, high: usize) -> ListenerResult {
        let mut errors = FirstError::new();
        if self.refilter_on_update.get() {
            errors.record(self.resynch_span(low, high + 1));
        }
        let start = self.first_at_or_after(low);
        let end = self.first_at_or_after(high + 1);
        if start < end {
            errors.record(self.refresh_positions(start, end));
        }
        errors.finish()
    }

    fn on_rearrange(&self, reorder: &Reorder) -> ListenerResult {
        let start = self.first_at_or_after(reorder.low());
        let end = self.first_at_or_after(reorder.high() + 1);
        if start >= end {
            return Ok(());
        }
        self.image.edit_silently(|entries| {
            for entry in &mut entries[start..end] {
                entry.source_index = reorder.new_index(entry.source_index);
            }
        });
        self.image
            .sort_range_by(start, end - 1, |a, b| a.source_index.cmp(&b.source_index))
    }

    /// Re-read and reconvert entries at image positions `start..end`, then
    /// fire one `Update` over them.
    fn refresh_positions(&self, start: usize, end: usize) -> Result<()> {
        let indices: Vec<usize> = self
            .image
            .with_items(|entries| entries[start..end].iter().map(|e| e.source_index).collect());
        let converter = self.converter();
        let fresh: Vec<Option<(S, D)>> = indices
            .iter()
            .map(|&i| {
                self.source.get(i).map(|item| {
                    let derived = converter(&item);
                    (item, derived)
                })
            })
            .collect();
        self.image.edit_silently(|entries| {
            for (entry, refreshed) in entries[start..end].iter_mut().zip(fresh) {
                if let Some((item, derived)) = refreshed {
                    entry.source_item = item;
                    entry.derived = derived;
                }
            }
        });
        self.image.update_range(start, end - 1)
    }

    /// Two passes over source indices `low..high`: drop entries that are no
    /// longer accepted, then insert accepted items that are missing.
    fn resynch_span(&self, low: usize, high: usize) -> Result<()> {
        let predicate = self.predicate();
        let mut errors = FirstError::new();

        let start = self.first_at_or_after(low);
        let end = self.first_at_or_after(high);
        let candidates: Vec<(usize, usize)> = self.image.with_items(|entries| {
            entries[start..end]
                .iter()
                .enumerate()
                .map(|(k, e)| (start + k, e.source_index))
                .collect()
        });
        let doomed: Vec<usize> = candidates
            .into_iter()
            .filter(|&(_, si)| self.source.get(si).is_none_or(|item| !predicate(&item)))
            .map(|(pos, _)| pos)
            .collect();
        let removed = doomed.len();
        for (from, to) in runs(&doomed).into_iter().rev() {
            errors.record(self.image.remove_range(from, to).map(drop));
        }

        let mut inserted = 0;
        let mut position = self.first_at_or_after(low);
        let mut pending: Vec<ImageEntry<S, D>> = Vec::new();
        let limit = high.min(self.source.len());
        for i in low..limit {
            let represented = self
                .image
                .with(position, |e| e.source_index == i)
                .unwrap_or(false);
            if represented {
                if !pending.is_empty() {
                    let count = pending.len();
                    errors.record(self.image.insert_all(position, std::mem::take(&mut pending)));
                    inserted += count;
                    position += count;
                }
                position += 1;
                continue;
            }
            if let Some(item) = self.source.get(i).filter(|item| predicate(item)) {
                pending.push(self.entry(item, i));
            }
        }
        if !pending.is_empty() {
            inserted += pending.len();
            errors.record(self.image.insert_all(position, pending));
        }

        if removed > 0 || inserted > 0 {
            trace!(removed, inserted, low, "image resynch");
        }
        errors.finish()
    }
}

impl<S: Clone + 'static, D: Clone + 'static> ListModel<D> for ImageList<S, D> {
    fn len(&self) -> usize {
        ImageList::len(self)
    }

    fn get(&self, index: usize) -> Option<D> {
        ImageList::get(self, index)
    }

    fn observe(&self, mut listener: EventCallback<D>) -> Subscription {
        self.state
            .image
            .observe(Box::new(move |event| listener(&event.map_items(|e| e.derived.clone()))))
    }

    fn observe_removal_preview(&self, mut listener: PreviewCallback<D>) -> Subscription {
        self.state
            .image
            .observe_removal_preview(Box::new(move |notice| listener(&notice.map_items(|e| e.derived.clone()))))
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        self.state.image.force_update_at(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log<T> = Rc<RefCell<Vec<ListEvent<T>>>>;

    fn record<T: Clone + 'static>(list: &impl ListModel<T>) -> (Log<T>, Subscription) {
        let log: Log<T> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = list.observe(Box::new(move |e: &ListEvent<T>| {
            sink.borrow_mut().push(e.clone());
            Ok(())
        }));
        (log, sub)
    }

    fn chars(s: &str) -> OrderList<char> {
        OrderList::from_vec(s.chars().collect())
    }

    #[test]
    fn filter_scenario() {
        let source = chars("ABC");
        let view = ImageList::filtered(source.clone(), |c| *c != 'B');
        assert_eq!(view.to_vec(), vec!['A', 'C']);
        let (log, _sub) = record(&view);

        source.insert(1, 'D').unwrap();
        assert_eq!(view.to_vec(), vec!['A', 'D', 'C']);
        assert_eq!(log.borrow().len(), 1);
        assert!(matches!(log.borrow()[0], ListEvent::Insert { index: 1, len: 1 }));

        source.remove_range(1, 3).unwrap();
        assert_eq!(view.to_vec(), vec!['A', 'C']);
        assert_eq!(log.borrow().len(), 2);
        match &log.borrow()[1] {
            ListEvent::Remove(removed) => {
                assert_eq!(removed.first_index(), 1);
                assert_eq!(removed.items(), &['D']);
            }
            other => panic!("expected remove, got {other:?}"),
        }
        view.check_consistent().unwrap();
    }

    #[test]
    fn small_inserts_fire_per_item_large_in_bulk() {
        let source = chars("a");
        let view = ImageList::filtered(source.clone(), |_| true);
        let (log, _sub) = record(&view);

        source.insert_all(1, vec!['b', 'c']).unwrap();
        assert_eq!(log.borrow().len(), 2);

        source.insert_all(0, vec!['x', 'y', 'z']).unwrap();
        assert_eq!(log.borrow().len(), 3);
        assert!(matches!(log.borrow()[2], ListEvent::Insert { index: 0, len: 3 }));
        assert_eq!(view.to_vec(), vec!['x', 'y', 'z', 'a', 'b', 'c']);
    }

    #[test]
    fn rejected_inserts_shift_indices_silently() {
        let source = chars("ab");
        let view = ImageList::filtered(source.clone(), |c| c.is_lowercase());
        let (log, _sub) = record(&view);
        source.insert(0, 'X').unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(view.source_index_of(0), Some(1));
        view.check_consistent().unwrap();
    }

    #[test]
    fn update_refilters_membership() {
        let source = OrderList::from_vec(vec![1, 2, 3, 4]);
        let view = ImageList::filtered(source.clone(), |v| v % 2 == 0);
        assert_eq!(view.to_vec(), vec![2, 4]);
        source.replace_at(0, 10).unwrap();
        assert_eq!(view.to_vec(), vec![10, 2, 4]);
        source.replace_at(1, 11).unwrap();
        assert_eq!(view.to_vec(), vec![10, 4]);
        view.check_consistent().unwrap();
    }

    #[test]
    fn converted_view_reconverts_on_update() {
        let source = OrderList::from_vec(vec![1, 2, 3]);
        let view = ImageList::converted(source.clone(), |v| v * 100);
        let (log, _sub) = record(&view);
        source.replace_at(1, 5).unwrap();
        assert_eq!(view.to_vec(), vec![100, 500, 300]);
        assert!(matches!(log.borrow()[0], ListEvent::Update { low: 1, high: 1 }));
    }

    #[test]
    fn rearrange_reorders_image() {
        let source = chars("abcd");
        let view = ImageList::new(source.clone(), |c| *c != 'b', |c| c.to_ascii_uppercase());
        let (log, _sub) = record(&view);
        source.swap(0, 3).unwrap();
        assert_eq!(view.to_vec(), vec!['D', 'C', 'A']);
        assert_eq!(log.borrow().len(), 1);
        assert!(matches!(log.borrow()[0], ListEvent::Rearrange(_)));
        view.check_consistent().unwrap();
    }

    #[test]
    fn rearrange_inside_single_entry_is_silent() {
        let source = chars("aXY");
        let view = ImageList::filtered(source.clone(), |c| c.is_lowercase());
        let (log, _sub) = record(&view);
        source.swap(0, 2).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(view.source_index_of(0), Some(2));
    }

    #[test]
    fn resynch_is_idempotent() {
        let source = OrderList::from_vec(vec![1, 2, 3, 4, 5, 6]);
        let threshold = Rc::new(Cell::new(3));
        let t = Rc::clone(&threshold);
        let view = ImageList::filtered(source.clone(), move |v| *v > t.get());
        assert_eq!(view.to_vec(), vec![4, 5, 6]);
        let (log, _sub) = record(&view);

        threshold.set(1);
        view.resynch().unwrap();
        assert_eq!(view.to_vec(), vec![2, 3, 4, 5, 6]);
        let fired = log.borrow().len();
        assert_eq!(fired, 1);

        view.resynch().unwrap();
        assert_eq!(log.borrow().len(), fired);
    }

    #[test]
    fn set_predicate_and_converter() {
        let source = OrderList::from_vec(vec![1, 2, 3, 4]);
        let view = ImageList::new(source.clone(), |v| *v > 2, |v| v.to_string());
        view.set_predicate(|v| v % 2 == 1).unwrap();
        assert_eq!(view.to_vec(), vec!["1", "3"]);
        view.set_converter(|v| format!("#{v}")).unwrap();
        assert_eq!(view.to_vec(), vec!["#1", "#3"]);
    }

    #[test]
    fn driven_view_waits_for_owner() {
        let source = chars("ab");
        let view = ImageList::driven(Rc::new(source.clone()), |_| true, |c| *c);
        source.push('c').unwrap();
        assert_eq!(view.len(), 2);
        view.apply_source_event(&ListEvent::Insert { index: 2, len: 1 }).unwrap();
        assert_eq!(view.to_vec(), vec!['a', 'b', 'c']);
        assert!(!view.is_attached());
    }

    #[test]
    fn detach_stops_tracking() {
        let source = chars("ab");
        let view = ImageList::filtered(source.clone(), |_| true);
        assert!(view.is_attached());
        view.detach();
        source.push('c').unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn dropping_view_unsubscribes() {
        let source = chars("ab");
        let view = ImageList::filtered(source.clone(), |_| true);
        assert_eq!(source.listener_count(), 1);
        drop(view);
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn removal_preview_is_projected() {
        let source = OrderList::from_vec(vec![1, 2, 3]);
        let view = ImageList::converted(source.clone(), |v| v * 2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = view.observe_removal_preview(Box::new(move |notice| {
            s.borrow_mut().extend_from_slice(notice.items());
            Ok(())
        }));
        source.remove_at(1).unwrap();
        assert_eq!(*seen.borrow(), vec![4]);
    }

    #[test]
    fn image_updated_reconverts_one_entry() {
        let source = OrderList::from_vec(vec![1, 2]);
        let factor = Rc::new(Cell::new(1));
        let f = Rc::clone(&factor);
        let view = ImageList::converted(source, move |v| v * f.get());
        factor.set(7);
        view.image_updated(1).unwrap();
        assert_eq!(view.to_vec(), vec![1, 14]);
        assert!(view.image_updated(5).is_err());
    }
}
