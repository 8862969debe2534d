#![forbid(unsafe_code)]

//! Runtime: batching of list changes queued from any thread.
//!
//! # Architecture
//!
//! - [`BatchQueue`] collects add/update/remove requests from producer
//!   threads.
//! - [`BatchUpdater`] owns an [`OrderList`](obslist_core::OrderList) and
//!   applies queued requests in throttled flushes driven by
//!   [`poll`](BatchUpdater::poll).
//! - [`Clock`] abstracts time so tests can advance it by hand.

pub mod batch;
pub mod clock;
pub mod config;

pub use batch::{BatchQueue, BatchUpdater, WaitingCallback};
pub use clock::{Clock, ManualClock};
pub use config::BatchConfig;
