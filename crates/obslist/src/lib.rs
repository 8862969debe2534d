#![forbid(unsafe_code)]

//! obslist public facade crate.
//!
//! Re-exports the list contract, the backing list, the derived views and
//! (with the `runtime` feature) the batching updater.

pub mod prelude {
    pub use obslist_core as core;
    #[cfg(feature = "runtime")]
    pub use obslist_runtime as runtime;

    pub use obslist_core::{
        ImageList, ListEvent, ListModel, ListenerResult, ModelError, OrderList, RemoveNotice,
        RemovedEvent, Reorder, SegmentedList, SharedList, SortedList, SubsetList, Subscription,
        UnionList, UniqueList, shared,
    };
    #[cfg(feature = "runtime")]
    pub use obslist_runtime::{BatchConfig, BatchQueue, BatchUpdater, Clock, ManualClock};
}
