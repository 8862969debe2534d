#![forbid(unsafe_code)]

//! Concatenation of several lists.
//!
//! # Design
//!
//! [`SegmentedList<T>`] shows its segments back to back. Each segment is
//! identified by a stable id so its listener can recompute the segment's
//! offset when an event arrives; events (and removal previews) are re-fired
//! translated by that offset. Adding or removing a whole segment fires one
//! `Insert` or `Remove` at the segment's flattened position.
//!
//! # Invariants
//!
//! 1. `len()` is the sum of the segment lengths.
//! 2. A segment's offset is the sum of the lengths of the segments before it,
//!    evaluated when the event is dispatched.
//! 3. A list is mounted at most once, so every forwarded event matches
//!    `len()` at the moment it is delivered.
//!
//! # Failure Modes
//!
//! - **Same list mounted twice**: rejected with
//!   [`ModelError::DuplicateSegment`]. Two mounts would both grow before the
//!   first translated event reaches listeners.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::dispatch::{Dispatcher, Subscription};
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::{ListEvent, RemoveNotice, RemovedEvent};
use crate::model::{EventCallback, ListModel, PreviewCallback, SharedList};

struct Segment<T> {
    id: u64,
    list: SharedList<T>,
    events: Subscription,
    _previews: Subscription,
}

struct SegmentedState<T> {
    segments: RefCell<Vec<Segment<T>>>,
    next_id: Cell<u64>,
    events: Rc<Dispatcher<ListEvent<T>>>,
    previews: Rc<Dispatcher<RemoveNotice<T>>>,
}

/// Lists shown one after another.
///
/// Cloning a `SegmentedList` creates a new handle to the **same** list.
pub struct SegmentedList<T> {
    state: Rc<SegmentedState<T>>,
}

impl<T> Clone for SegmentedList<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for SegmentedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedList")
            .field("segments", &self.segment_count())
            .field("items", &ListModel::to_vec(self))
            .finish()
    }
}

impl<T: Clone + 'static> Default for SegmentedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> SegmentedList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(SegmentedState {
                segments: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                events: Dispatcher::new(),
                previews: Dispatcher::new(),
            }),
        }
    }

    /// Append a segment.
    pub fn add_segment(&self, list: impl ListModel<T> + 'static) -> Result<()> {
        self.insert_segment(self.segment_count(), list)
    }

    /// Insert a segment before the segment currently at `position`.
    pub fn insert_segment(&self, position: usize, list: impl ListModel<T> + 'static) -> Result<()> {
        let count = self.segment_count();
        if position > count {
            return Err(ModelError::IndexOutOfBounds { index: position, len: count });
        }
        let list: SharedList<T> = Rc::new(list);
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);

        let weak: Weak<SegmentedState<T>> = Rc::downgrade(&self.state);
        let events = list.observe(Box::new(move |event| match weak.upgrade() {
            Some(state) => state.forward_event(id, event),
            None => Ok(()),
        }));
        let mounted = self
            .state
            .segments
            .borrow()
            .iter()
            .position(|segment| segment.events.same_source(&events));
        if let Some(mounted) = mounted {
            return Err(ModelError::DuplicateSegment { position: mounted });
        }
        let weak: Weak<SegmentedState<T>> = Rc::downgrade(&self.state);
        let previews = list.observe_removal_preview(Box::new(move |notice| match weak.upgrade() {
            Some(state) => state.forward_preview(id, notice),
            None => Ok(()),
        }));

        let len = list.len();
        let offset = self.state.offset_before(position);
        self.state.segments.borrow_mut().insert(position, Segment {
            id,
            list,
            events,
            _previews: previews,
        });
        debug!(position, offset, len, "segment inserted");
        if len == 0 {
            return Ok(());
        }
        self.state.events.fire(&ListEvent::Insert { index: offset, len })
    }

    /// Remove the segment at `position` and return it.
    pub fn remove_segment(&self, position: usize) -> Result<SharedList<T>> {
        let count = self.segment_count();
        ModelError::check_index(position, count)?;
        let offset = self.state.offset_before(position);
        let items: Rc<[T]> = self.state.segments.borrow()[position].list.to_vec().into();

        let mut errors = FirstError::new();
        let notice = (!items.is_empty()).then(|| RemoveNotice::new(offset, Rc::clone(&items)));
        if let Some(notice) = &notice {
            errors.record(self.state.previews.fire(notice));
        }
        let segment = self.state.segments.borrow_mut().remove(position);
        debug!(position, offset, len = items.len(), "segment removed");
        if !items.is_empty() {
            errors.record(
                self.state
                    .events
                    .fire(&ListEvent::Remove(RemovedEvent::new(offset, items))),
            );
        }
        errors.finish()?;
        Ok(segment.list)
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.segments.borrow().len()
    }

    /// Flattened index of the first item of segment `position`.
    ///
    /// `position == segment_count()` yields the total length.
    pub fn segment_offset(&self, position: usize) -> Result<usize> {
        let count = self.segment_count();
        if position > count {
            return Err(ModelError::IndexOutOfBounds { index: position, len: count });
        }
        Ok(self.state.offset_before(position))
    }

    /// Segment position and local index of flattened `index`.
    #[must_use]
    pub fn segment_at(&self, index: usize) -> Option<(usize, usize)> {
        let segments = self.state.segments.borrow();
        let mut offset = 0;
        for (position, segment) in segments.iter().enumerate() {
            let len = segment.list.len();
            if index < offset + len {
                return Some((position, index - offset));
            }
            offset += len;
        }
        None
    }

    /// The list backing segment `position`.
    #[must_use]
    pub fn segment(&self, position: usize) -> Option<SharedList<T>> {
        self.state
            .segments
            .borrow()
            .get(position)
            .map(|segment| Rc::clone(&segment.list))
    }
}

impl<T: Clone + 'static> SegmentedState<T> {
    fn offset_before(&self, position: usize) -> usize {
        self.segments
            .borrow()
            .iter()
            .take(position)
            .map(|segment| segment.list.len())
            .sum()
    }

    fn offset_of(&self, id: u64) -> Option<usize> {
        let segments = self.segments.borrow();
        let position = segments.iter().position(|segment| segment.id == id)?;
        Some(segments[..position].iter().map(|segment| segment.list.len()).sum())
    }

    fn forward_event(&self, id: u64, event: &ListEvent<T>) -> ListenerResult {
        match self.offset_of(id) {
            Some(offset) => self.events.fire(&event.translated(offset as isize)),
            None => Ok(()),
        }
    }

    fn forward_preview(&self, id: u64, notice: &RemoveNotice<T>) -> ListenerResult {
        match self.offset_of(id) {
            Some(offset) => self.previews.fire(&notice.translated(offset as isize)),
            None => Ok(()),
        }
    }
}

impl<T: Clone + 'static> ListModel<T> for SegmentedList<T> {
    fn len(&self) -> usize {
        self.state.offset_before(usize::MAX)
    }

    fn get(&self, index: usize) -> Option<T> {
        let (position, local) = self.segment_at(index)?;
        self.segment(position)?.get(local)
    }

    fn observe(&self, listener: EventCallback<T>) -> Subscription {
        self.state.events.subscribe(listener)
    }

    fn observe_removal_preview(&self, listener: PreviewCallback<T>) -> Subscription {
        self.state.previews.subscribe(listener)
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        match self.segment_at(index) {
            Some((position, local)) => match self.segment(position) {
                Some(list) => list.force_update_at(local),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}
