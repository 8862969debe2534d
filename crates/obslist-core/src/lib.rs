#![forbid(unsafe_code)]

//! Core: observable lists, change events, and derived list views.
//!
//! # Architecture
//!
//! - [`ListModel`] is the read-and-observe contract every list implements.
//! - [`OrderList`] is the mutable backing list.
//! - Decorators derive one list from others and keep themselves up to date
//!   incrementally: [`ImageList`] (filter and projection), [`SortedList`],
//!   [`UniqueList`], [`UnionList`], [`SubsetList`] and [`SegmentedList`].
//!
//! All list types are single-threaded (`Rc`-based) and dispatch events
//! synchronously on the thread that mutates them.

pub mod dispatch;
pub mod error;
pub mod event;
pub mod image;
pub mod index_map;
pub mod model;
pub mod order_list;
pub mod segmented;
pub mod sorted;
pub mod subset;
pub mod union;
pub mod unique;

pub use dispatch::Subscription;
pub use error::{ListenerResult, ModelError, Result};
pub use event::{ListEvent, RemoveNotice, RemovedEvent, Reorder};
pub use image::{GROUP_THRESHOLD, ImageEntry, ImageList};
pub use index_map::TwoWayIndexMap;
pub use model::{EmptyList, EventCallback, ListModel, PreviewCallback, SharedList, shared};
pub use order_list::OrderList;
pub use segmented::SegmentedList;
pub use sorted::{Comparator, SortedList};
pub use subset::SubsetList;
pub use union::{Ownership, UnionList};
pub use unique::UniqueList;
