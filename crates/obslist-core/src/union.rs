#![forbid(unsafe_code)]

//! Union of several keyed source lists.
//!
//! # Design
//!
//! [`UnionList<K, T>`] shows every value held by at least one registered
//! source. For each value it keeps an [`Ownership`] record: the common case
//! of a value held by one source is a single key plus occurrence count;
//! values held by several sources switch to a per-key count map. Every
//! source also has a mirror vector so an in-place update can release the old
//! value and acquire the new one.
//!
//! Aggregate order is first-seen order. It is not stable across removals.
//!
//! # Invariants
//!
//! 1. A value is present iff some registered source contains it.
//! 2. Ownership counts equal the occurrence counts in the mirrors.
//! 3. Each mirror equals its source's content after every dispatched event.
//!
//! # Failure Modes
//!
//! - **Release of an unowned value**: logged at `WARN` and ignored.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::dispatch::Subscription;
use crate::error::{FirstError, ListenerResult, ModelError, Result};
use crate::event::ListEvent;
use crate::model::{EventCallback, ListModel, PreviewCallback, SharedList};
use crate::order_list::OrderList;

/// Which sources hold a value, and how many times.
#[derive(Debug, Clone)]
pub enum Ownership<K> {
    Single { key: K, count: usize },
    Shared(AHashMap<K, usize>),
}

impl<K: Eq + Hash> PartialEq for Ownership<K> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Single { key: a, count: x }, Self::Single { key: b, count: y }) => a == b && x == y,
            (Self::Shared(a), Self::Shared(b)) => a == b,
            _ => false,
        }
    }
}

impl<K: Eq + Hash> Eq for Ownership<K> {}

impl<K: Clone + Eq + Hash> Ownership<K> {
    /// Keys of every source holding the value.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        match self {
            Self::Single { key, .. } => vec![key.clone()],
            Self::Shared(counts) => counts.keys().cloned().collect(),
        }
    }

    fn acquire(&mut self, owner: &K) {
        match self {
            Self::Single { key, count } if key == owner => *count += 1,
            Self::Single { key, count } => {
                let mut counts = AHashMap::with_capacity(2);
                counts.insert(key.clone(), *count);
                counts.insert(owner.clone(), 1);
                *self = Self::Shared(counts);
            }
            Self::Shared(counts) => *counts.entry(owner.clone()).or_insert(0) += 1,
        }
    }

    /// Drop one occurrence; returns `None` when nothing owns the value any more.
    fn release(self, owner: &K) -> Option<Self> {
        match self {
            Self::Single { key, count } if &key == owner => {
                (count > 1).then(|| Self::Single { key, count: count - 1 })
            }
            single @ Self::Single { .. } => {
                warn!("release by a source that does not own the value");
                Some(single)
            }
            Self::Shared(mut counts) => {
                match counts.get_mut(owner) {
                    Some(count) if *count > 1 => *count -= 1,
                    Some(_) => {
                        counts.remove(owner);
                    }
                    None => warn!("release by a source that does not own the value"),
                }
                if counts.len() == 1 {
                    counts
                        .into_iter()
                        .next()
                        .map(|(key, count)| Self::Single { key, count })
                } else if counts.is_empty() {
                    None
                } else {
                    Some(Self::Shared(counts))
                }
            }
        }
    }
}

struct SourceSlot<K, T> {
    key: K,
    list: SharedList<T>,
    mirror: Vec<T>,
    _subscription: Subscription,
}

struct UnionState<K, T> {
    items: OrderList<T>,
    owners: RefCell<AHashMap<T, Ownership<K>>>,
    sources: RefCell<Vec<SourceSlot<K, T>>>,
}

/// Values present in any of several keyed sources.
///
/// Cloning a `UnionList` creates a new handle to the **same** view.
pub struct UnionList<K, T> {
    state: Rc<UnionState<K, T>>,
}

impl<K, T> Clone for UnionList<K, T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<K, T> fmt::Debug for UnionList<K, T>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    T: Clone + Eq + Hash + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnionList")
            .field("items", &self.state.items.to_vec())
            .field("sources", &self.source_keys())
            .finish()
    }
}

impl<K, T> Default for UnionList<K, T>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + Eq + Hash + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> UnionList<K, T>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + Eq + Hash + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(UnionState {
                items: OrderList::new(),
                owners: RefCell::new(AHashMap::new()),
                sources: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register `list` under `key`, replacing any source with the same key.
    pub fn add_source(&self, key: K, list: impl ListModel<T> + 'static) -> Result<()> {
        let mut errors = FirstError::new();
        if self.has_source(&key) {
            errors.record(self.remove_source(&key).map(drop));
        }
        let list: SharedList<T> = Rc::new(list);
        let mirror = list.to_vec();
        let fresh = self.state.acquire_all(&key, &mirror);

        let weak: Weak<UnionState<K, T>> = Rc::downgrade(&self.state);
        let owner = key.clone();
        let subscription = list.observe(Box::new(move |event| match weak.upgrade() {
            Some(state) => state.on_source_event(&owner, event),
            None => Ok(()),
        }));
        self.state.sources.borrow_mut().push(SourceSlot {
            key,
            list,
            mirror,
            _subscription: subscription,
        });
        debug!(added = fresh.len(), "union source registered");
        errors.record(self.state.items.push_all(fresh));
        errors.finish()
    }

    /// Unregister `key`; values it alone held leave the union.
    pub fn remove_source(&self, key: &K) -> Result<bool> {
        let slot = {
            let mut sources = self.state.sources.borrow_mut();
            match sources.iter().position(|slot| &slot.key == key) {
                Some(pos) => sources.remove(pos),
                None => return Ok(false),
            }
        };
        let released = self.state.release_all(key, &slot.mirror);
        debug!(removed = released.len(), "union source unregistered");
        drop(slot);
        self.state.remove_values(&released)?;
        Ok(true)
    }

    #[must_use]
    pub fn has_source(&self, key: &K) -> bool {
        self.state.sources.borrow().iter().any(|slot| &slot.key == key)
    }

    /// Registered keys, in registration order.
    #[must_use]
    pub fn source_keys(&self) -> Vec<K> {
        self.state
            .sources
            .borrow()
            .iter()
            .map(|slot| slot.key.clone())
            .collect()
    }

    /// Ownership record of `item`, if present.
    #[must_use]
    pub fn ownership(&self, item: &T) -> Option<Ownership<K>> {
        self.state.owners.borrow().get(item).cloned()
    }

    /// Verify mirrors, ownership counts and membership.
    pub fn check_consistent(&self) -> Result<()> {
        let mut expected: AHashMap<T, AHashMap<K, usize>> = AHashMap::new();
        for slot in self.state.sources.borrow().iter() {
            if slot.mirror != slot.list.to_vec() {
                return Err(ModelError::inconsistent("source mirror out of date"));
            }
            for item in &slot.mirror {
                *expected
                    .entry(item.clone())
                    .or_default()
                    .entry(slot.key.clone())
                    .or_insert(0) += 1;
            }
        }
        let owners = self.state.owners.borrow();
        if owners.len() != expected.len() || self.state.items.len() != expected.len() {
            return Err(ModelError::inconsistent(format!(
                "union holds {} values, sources hold {}",
                self.state.items.len(),
                expected.len()
            )));
        }
        for (item, counts) in &expected {
            let actual: AHashMap<K, usize> = match owners.get(item) {
                Some(Ownership::Single { key, count }) => [(key.clone(), *count)].into_iter().collect(),
                Some(Ownership::Shared(map)) => map.clone(),
                None => AHashMap::new(),
            };
            if &actual != counts || !self.state.items.with_items(|items| items.contains(item)) {
                return Err(ModelError::inconsistent("ownership record does not match sources"));
            }
        }
        Ok(())
    }
}

impl<K, T> UnionState<K, T>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + Eq + Hash + 'static,
{
    /// Count `items` for `key`; returns values that were absent before, once each.
    fn acquire_all(&self, key: &K, items: &[T]) -> Vec<T> {
        let mut owners = self.owners.borrow_mut();
        let mut fresh = Vec::new();
        for item in items {
            match owners.get_mut(item) {
                Some(ownership) => ownership.acquire(key),
                None => {
                    owners.insert(item.clone(), Ownership::Single {
                        key: key.clone(),
                        count: 1,
                    });
                    fresh.push(item.clone());
                }
            }
        }
        fresh
    }

    /// Uncount `items` for `key`; returns values no source holds any more.
    fn release_all(&self, key: &K, items: &[T]) -> Vec<T> {
        let mut owners = self.owners.borrow_mut();
        let mut released = Vec::new();
        for item in items {
            let Some(ownership) = owners.remove(item) else {
                warn!("released value is not part of the union");
                continue;
            };
            match ownership.release(key) {
                Some(rest) => {
                    owners.insert(item.clone(), rest);
                }
                None => released.push(item.clone()),
            }
        }
        released
    }

    fn remove_values(&self, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let indices = self.items.with_items(|items| {
            values
                .iter()
                .filter_map(|value| items.iter().position(|item| item == value))
                .collect::<Vec<_>>()
        });
        self.items.remove_indices(&indices)
    }

    fn on_source_event(&self, key: &K, event: &ListEvent<T>) -> ListenerResult {
        let mut acquired: Vec<T> = Vec::new();
        let mut released: Vec<T> = Vec::new();
        let mut touched: Vec<T> = Vec::new();
        {
            let mut sources = self.sources.borrow_mut();
            let Some(slot) = sources.iter_mut().find(|slot| &slot.key == key) else {
                return Ok(());
            };
            match event {
                ListEvent::Insert { index, len } => {
                    let fresh: Vec<T> = (*index..index + len).filter_map(|i| slot.list.get(i)).collect();
                    let at = (*index).min(slot.mirror.len());
                    slot.mirror.splice(at..at, fresh.iter().cloned());
                    acquired = fresh;
                }
                ListEvent::Remove(removed) => {
                    let end = (removed.first_index() + removed.len()).min(slot.mirror.len());
                    let start = removed.first_index().min(end);
                    released = slot.mirror.drain(start..end).collect();
                }
                ListEvent::Update { low, high } => {
                    for i in *low..=*high {
                        let (Some(old), Some(new)) = (slot.mirror.get(i).cloned(), slot.list.get(i)) else {
                            continue;
                        };
                        if old == new {
                            touched.push(new.clone());
                        } else {
                            released.push(old);
                            acquired.push(new.clone());
                        }
                        slot.mirror[i] = new;
                    }
                }
                ListEvent::Rearrange(reorder) => {
                    if reorder.high() < slot.mirror.len() {
                        event.apply_to(&mut slot.mirror, &*slot.list);
                    }
                }
            }
        }

        let fresh = self.acquire_all(key, &acquired);
        let gone = self.release_all(key, &released);
        let mut errors = FirstError::new();
        errors.record(self.remove_values(&gone));
        errors.record(self.items.push_all(fresh));
        for value in touched {
            let position = self.items.with_items(|items| items.iter().position(|item| *item == value));
            if let Some(position) = position {
                errors.record(self.items.replace_at(position, value).map(drop));
            }
        }
        errors.finish()
    }
}

impl<K, T> ListModel<T> for UnionList<K, T>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + Eq + Hash + 'static,
{
    fn len(&self) -> usize {
        self.state.items.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.state.items.get(index)
    }

    fn observe(&self, listener: EventCallback<T>) -> Subscription {
        self.state.items.observe(listener)
    }

    fn observe_removal_preview(&self, listener: PreviewCallback<T>) -> Subscription {
        self.state.items.observe_removal_preview(listener)
    }

    fn force_update_at(&self, index: usize) -> ListenerResult {
        self.state.items.force_update_at(index)
    }
}
