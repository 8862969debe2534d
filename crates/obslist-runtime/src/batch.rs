#![forbid(unsafe_code)]

//! Coalescing, throttled updates of an [`OrderList`].
//!
//! # Design
//!
//! The updater is split in two halves:
//!
//! - [`BatchQueue<T>`] is `Send + Sync` and may be cloned into producer
//!   threads. It records requests into pending add/update/remove sets, so
//!   repeated requests for the same item coalesce, and schedules a flush
//!   deadline.
//! - [`BatchUpdater<T>`] lives on the thread that owns the list. It applies
//!   everything queued in one flush: removals, then in-place updates (one
//!   `Update` event), then additions (one `Insert` event).
//!
//! Nothing runs on a timer thread. The host loop calls
//! [`BatchUpdater::poll`] and sleeps until [`BatchUpdater::next_deadline`].
//!
//! # Invariants
//!
//! 1. An item is never pending for both addition and removal.
//! 2. Two scheduled flushes are at least `period` apart; an explicit
//!    [`flush`](BatchUpdater::flush) bypasses the schedule.
//! 3. The queue lock is never held while the list mutates or a callback runs.
//!
//! # Failure Modes
//!
//! - **Flush requested during a flush** (from a list listener): deferred by
//!   one period.
//! - **Waiting callback fails**: with a single callback its error is returned
//!   to the caller; with several, each failure is logged at `ERROR` and the
//!   rest still run.
//! - **Unbalanced `adding_element(false)`**: logged at `WARN`; the counter
//!   stays at zero.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashSet;
use obslist_core::{ListModel, ListenerResult, ModelError, OrderList, Result};
use tracing::{debug, error, warn};
use web_time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::BatchConfig;

/// Callback run once no updates are pending.
pub type WaitingCallback = Box<dyn FnOnce() -> ListenerResult + Send>;

type RemovedHook<T> = Box<dyn FnMut(&[T])>;

// ─── Pending state ───────────────────────────────────────────────────────────

struct Pending<T> {
    to_add: AHashSet<T>,
    to_update: AHashSet<T>,
    to_remove: AHashSet<T>,
    /// Forewarned additions not yet completed.
    adding: usize,
    waiting: Vec<WaitingCallback>,
    /// Consumed by the first request.
    initial_delay: Duration,
    deadline: Option<Instant>,
    last_flush: Option<Instant>,
}

impl<T: Eq + Hash> Pending<T> {
    fn new(initial_delay: Duration) -> Self {
        Self {
            to_add: AHashSet::new(),
            to_update: AHashSet::new(),
            to_remove: AHashSet::new(),
            adding: 0,
            waiting: Vec::new(),
            initial_delay,
            deadline: None,
            last_flush: None,
        }
    }

    fn has_pending(&self) -> bool {
        !self.to_add.is_empty()
            || !self.to_update.is_empty()
            || !self.to_remove.is_empty()
            || self.adding > 0
    }

    fn take_waiting_if_idle(&mut self) -> Vec<WaitingCallback> {
        if self.has_pending() {
            Vec::new()
        } else {
            std::mem::take(&mut self.waiting)
        }
    }

    fn request(&mut self, now: Instant, period: Duration) {
        if !self.initial_delay.is_zero() {
            let earliest = now + std::mem::take(&mut self.initial_delay);
            self.deadline = Some(self.deadline.map_or(earliest, |d| d.max(earliest)));
            return;
        }
        if self.deadline.is_none() {
            let earliest = self.last_flush.map_or(now, |last| (last + period).max(now));
            self.deadline = Some(earliest);
        }
    }
}

struct Shared<T> {
    pending: Mutex<Pending<T>>,
    clock: Clock,
    period: Duration,
}

/// Everything taken out of the queue by one flush.
struct Batch<T> {
    add: Vec<T>,
    update: AHashSet<T>,
    remove: Vec<T>,
    waiting: Vec<WaitingCallback>,
}

// ─── BatchQueue ──────────────────────────────────────────────────────────────

/// Thread-safe handle for queueing list changes.
///
/// Cloning a `BatchQueue` creates a new handle to the **same** queue.
pub struct BatchQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Eq + Hash> fmt::Debug for BatchQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.lock();
        f.debug_struct("BatchQueue")
            .field("to_add", &pending.to_add.len())
            .field("to_update", &pending.to_update.len())
            .field("to_remove", &pending.to_remove.len())
            .field("adding", &pending.adding)
            .field("waiting", &pending.waiting.len())
            .field("deadline", &pending.deadline)
            .finish()
    }
}

impl<T: Eq + Hash> BatchQueue<T> {
    fn new(config: BatchConfig, clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending::new(config.initial_delay)),
                clock,
                period: config.period,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending<T>> {
        self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    /// Queue `item` for addition. An item queued for removal is updated
    /// instead.
    pub fn add(&self, item: T) {
        self.add_all([item]);
    }

    /// Queue several additions. Each item follows the [`add`](Self::add)
    /// rule: one queued for removal becomes an update, so an item the list
    /// still holds is never added a second time.
    pub fn add_all(&self, items: impl IntoIterator<Item = T>) {
        let now = self.now();
        let mut pending = self.lock();
        for item in items {
            if pending.to_remove.remove(&item) {
                pending.to_update.insert(item);
            } else {
                pending.to_add.insert(item);
            }
        }
        pending.request(now, self.shared.period);
    }

    /// Queue an in-place update. Ignored while `item` is queued for removal.
    pub fn update(&self, item: T) {
        let now = self.now();
        let mut pending = self.lock();
        if pending.to_remove.contains(&item) {
            return;
        }
        pending.to_update.insert(item);
        pending.request(now, self.shared.period);
    }

    /// Queue `item` for removal, cancelling a pending addition or update.
    pub fn remove(&self, item: T) {
        let now = self.now();
        let mut pending = self.lock();
        pending.to_add.remove(&item);
        pending.to_update.remove(&item);
        pending.to_remove.insert(item);
        pending.request(now, self.shared.period);
    }

    /// Announce (`true`) or complete (`false`) an addition that has not been
    /// queued yet. Waiting callbacks stay queued while announcements are open.
    pub fn adding_element(&self, set: bool) -> ListenerResult {
        let waiting = {
            let mut pending = self.lock();
            if set {
                pending.adding += 1;
            } else if pending.adding == 0 {
                warn!("adding_element(false) without a matching announcement");
            } else {
                pending.adding -= 1;
            }
            pending.take_waiting_if_idle()
        };
        run_waiting(waiting)
    }

    /// Run `callback` now when nothing is pending, otherwise once the
    /// pending updates have been flushed.
    pub fn run_when_no_pending(
        &self,
        callback: impl FnOnce() -> ListenerResult + Send + 'static,
    ) -> ListenerResult {
        {
            let mut pending = self.lock();
            if pending.has_pending() {
                pending.waiting.push(Box::new(callback));
                return Ok(());
            }
        }
        callback()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lock().has_pending()
    }

    /// When the next scheduled flush is due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().deadline
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.shared.period
    }

    /// Clear a passed deadline; returns whether one had passed.
    fn take_due(&self) -> bool {
        let now = self.now();
        let mut pending = self.lock();
        match pending.deadline {
            Some(deadline) if deadline <= now => {
                pending.deadline = None;
                true
            }
            _ => false,
        }
    }

    fn abort(&self) {
        self.lock().deadline = None;
    }

    fn defer(&self) {
        let now = self.now();
        self.lock().deadline = Some(now + self.shared.period);
    }

    fn take_batch(&self) -> Batch<T> {
        let now = self.now();
        let mut pending = self.lock();
        let add = pending.to_add.drain().collect();
        let update = std::mem::take(&mut pending.to_update);
        let remove = pending.to_remove.drain().collect();
        pending.last_flush = Some(now);
        Batch {
            add,
            update,
            remove,
            waiting: pending.take_waiting_if_idle(),
        }
    }
}

fn run_waiting(waiting: Vec<WaitingCallback>) -> ListenerResult {
    if waiting.len() == 1 {
        return waiting.into_iter().next().map_or(Ok(()), |callback| callback());
    }
    let count = waiting.len();
    for callback in waiting {
        if let Err(err) = callback() {
            error!(count, error = %err, "pending-updates callback failed");
        }
    }
    Ok(())
}

fn keep_first(slot: &mut Option<ModelError>, result: Result<()>) {
    if let Err(err) = result {
        slot.get_or_insert(err);
    }
}

// ─── BatchUpdater ────────────────────────────────────────────────────────────

struct UpdaterInner<T> {
    queue: BatchQueue<T>,
    model: OrderList<T>,
    flushing: Cell<bool>,
    on_removed: RefCell<Option<RemovedHook<T>>>,
}

/// Owner of a list that receives queued changes in throttled batches.
///
/// Cloning a `BatchUpdater` creates a new handle to the **same** updater.
pub struct BatchUpdater<T> {
    inner: Rc<UpdaterInner<T>>,
}

impl<T> Clone for BatchUpdater<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Eq + Hash + fmt::Debug + 'static> fmt::Debug for BatchUpdater<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchUpdater")
            .field("model", &self.inner.model)
            .field("queue", &self.inner.queue)
            .field("flushing", &self.inner.flushing.get())
            .finish()
    }
}

/// Resets the flush guard on every exit path.
struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: Clone + Eq + Hash + 'static> BatchUpdater<T> {
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        Self::with_clock(config, Clock::Real)
    }

    #[must_use]
    pub fn with_clock(config: BatchConfig, clock: Clock) -> Self {
        Self {
            inner: Rc::new(UpdaterInner {
                queue: BatchQueue::new(config, clock),
                model: OrderList::new(),
                flushing: Cell::new(false),
                on_removed: RefCell::new(None),
            }),
        }
    }

    /// The list this updater maintains.
    #[must_use]
    pub fn model(&self) -> OrderList<T> {
        self.inner.model.clone()
    }

    /// A handle producers on other threads can queue through.
    #[must_use]
    pub fn queue(&self) -> BatchQueue<T> {
        self.inner.queue.clone()
    }

    pub fn add(&self, item: T) {
        self.inner.queue.add(item);
    }

    pub fn add_all(&self, items: impl IntoIterator<Item = T>) {
        self.inner.queue.add_all(items);
    }

    pub fn update(&self, item: T) {
        self.inner.queue.update(item);
    }

    pub fn remove(&self, item: T) {
        self.inner.queue.remove(item);
    }

    pub fn adding_element(&self, set: bool) -> ListenerResult {
        self.inner.queue.adding_element(set)
    }

    pub fn run_when_no_pending(
        &self,
        callback: impl FnOnce() -> ListenerResult + Send + 'static,
    ) -> ListenerResult {
        self.inner.queue.run_when_no_pending(callback)
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.queue.has_pending()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.queue.next_deadline()
    }

    /// Called with removed items: after each flush that removed some, and
    /// with pending additions dropped by [`remove_all`](Self::remove_all).
    pub fn on_elements_removed(&self, hook: impl FnMut(&[T]) + 'static) {
        *self.inner.on_removed.borrow_mut() = Some(Box::new(hook));
    }

    /// Flush when the scheduled deadline has passed; returns whether a
    /// flush ran.
    pub fn poll(&self) -> Result<bool> {
        if !self.inner.queue.take_due() {
            return Ok(false);
        }
        self.apply()
    }

    /// Apply everything queued now, ignoring the schedule.
    pub fn flush(&self) -> Result<()> {
        self.inner.queue.abort();
        self.apply().map(drop)
    }

    /// Queue updates for `items` (skipping those queued for removal) and
    /// flush at once.
    pub fn update_elements_and_flush(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let queued = {
            let mut pending = self.inner.queue.lock();
            let mut queued = false;
            for item in items {
                if !pending.to_remove.contains(&item) {
                    pending.to_update.insert(item);
                    queued = true;
                }
            }
            queued
        };
        if !queued {
            return Ok(());
        }
        self.flush()
    }

    /// Queue an update of every item the list will hold: current items and
    /// pending additions, minus items queued for removal.
    pub fn update_all(&self) {
        let current = self.inner.model.to_vec();
        let queue = &self.inner.queue;
        let now = queue.now();
        let mut pending = queue.lock();
        let Pending {
            to_add,
            to_update,
            to_remove,
            ..
        } = &mut *pending;
        to_update.extend(
            current
                .into_iter()
                .chain(to_add.iter().cloned())
                .filter(|item| !to_remove.contains(item)),
        );
        pending.request(now, queue.period());
    }

    /// Queue removal of everything: current items are queued for removal,
    /// pending additions and updates are dropped.
    pub fn remove_all(&self) -> ListenerResult {
        let current = self.inner.model.to_vec();
        let queue = &self.inner.queue;
        let now = queue.now();
        let (dropped, waiting) = {
            let mut pending = queue.lock();
            let dropped: Vec<T> = pending.to_add.drain().collect();
            pending.to_update.clear();
            pending.to_remove.extend(current);
            let waiting = pending.take_waiting_if_idle();
            pending.request(now, queue.period());
            (dropped, waiting)
        };
        if !dropped.is_empty() {
            self.notify_removed(&dropped);
        }
        run_waiting(waiting)
    }

    /// Items the list will hold once pending changes are applied.
    #[must_use]
    pub fn all_elements(&self) -> Vec<T> {
        let current = self.inner.model.to_vec();
        let pending = self.inner.queue.lock();
        let mut seen = AHashSet::new();
        current
            .into_iter()
            .chain(pending.to_add.iter().cloned())
            .filter(|item| !pending.to_remove.contains(item) && seen.insert(item.clone()))
            .collect()
    }

    /// Current items with no pending update or removal.
    #[must_use]
    pub fn all_not_changed(&self) -> Vec<T> {
        let current = self.inner.model.to_vec();
        let pending = self.inner.queue.lock();
        let mut seen = AHashSet::new();
        current
            .into_iter()
            .filter(|item| {
                !pending.to_remove.contains(item)
                    && !pending.to_update.contains(item)
                    && seen.insert(item.clone())
            })
            .collect()
    }

    fn apply(&self) -> Result<bool> {
        if self.inner.flushing.get() {
            debug!("flush requested while flushing; deferred by one period");
            self.inner.queue.defer();
            return Ok(false);
        }
        self.inner.flushing.set(true);
        let _guard = FlushGuard(&self.inner.flushing);
        self.apply_batch().map(|()| true)
    }

    fn apply_batch(&self) -> Result<()> {
        let batch = self.inner.queue.take_batch();
        let model = &self.inner.model;
        let (added, updated, removed) = (batch.add.len(), batch.update.len(), batch.remove.len());
        let mut first = None;

        if !batch.remove.is_empty() {
            let doomed: AHashSet<&T> = batch.remove.iter().collect();
            keep_first(&mut first, model.remove_where(|item| doomed.contains(item)).map(drop));
            self.notify_removed(&batch.remove);
        }

        if !batch.update.is_empty() {
            let mut touched: Vec<usize> = Vec::with_capacity(batch.update.len());
            for item in &batch.update {
                let index = model.with_items(|items| items.iter().position(|current| current == item));
                if let Some(index) = index {
                    keep_first(&mut first, model.replace_at_silent(index, item.clone()).map(drop));
                    touched.push(index);
                }
            }
            if let (Some(&low), Some(&high)) = (touched.iter().min(), touched.iter().max()) {
                keep_first(&mut first, model.update_range(low, high));
            }
        }

        if !batch.add.is_empty() {
            keep_first(&mut first, model.push_all(batch.add));
        }

        debug!(added, updated, removed, len = model.len(), "batch flushed");
        keep_first(&mut first, run_waiting(batch.waiting));
        first.map_or(Ok(()), Err)
    }

    fn notify_removed(&self, items: &[T]) {
        let hook = self.inner.on_removed.borrow_mut().take();
        if let Some(mut hook) = hook {
            hook(items);
            let mut slot = self.inner.on_removed.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        }
    }
}
