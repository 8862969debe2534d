#![forbid(unsafe_code)]

//! Property-based invariant tests for the batching updater.
//!
//! 1. A flush leaves the list holding exactly what `all_elements()` promised.
//! 2. Nothing is pending after a flush with no open announcements.
//! 3. Scheduled flushes are at least one period apart.
//! 4. The list's events replay onto a copy that matches it.

use std::cell::RefCell;
use std::rc::Rc;

use obslist_core::{ListEvent, ListModel};
use obslist_runtime::{BatchConfig, BatchUpdater, Clock, ManualClock};
use proptest::prelude::*;
use web_time::Duration;

const PERIOD: Duration = Duration::from_millis(50);

// ── Strategies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Add(u8),
    Update(u8),
    Remove(u8),
    RemoveAll,
    UpdateAll,
    Advance(u64),
    Poll,
    Flush,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0u8..12).prop_map(Step::Add),
        2 => (0u8..12).prop_map(Step::Update),
        3 => (0u8..12).prop_map(Step::Remove),
        1 => Just(Step::RemoveAll),
        1 => Just(Step::UpdateAll),
        3 => (0u64..80).prop_map(Step::Advance),
        3 => Just(Step::Poll),
        1 => Just(Step::Flush),
    ]
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn distinct(mut items: Vec<u8>) -> Vec<u8> {
    items.sort_unstable();
    items.dedup();
    items
}

fn setup() -> (BatchUpdater<u8>, ManualClock) {
    let clock = ManualClock::new();
    let updater = BatchUpdater::with_clock(BatchConfig::new(PERIOD), Clock::Manual(clock.clone()));
    (updater, clock)
}

// ═════════════════════════════════════════════════════════════════════════
// 1-2. Flush delivers the promised content
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn flush_delivers_all_elements(steps in proptest::collection::vec(step(), 0..60)) {
        let (updater, clock) = setup();
        for step in &steps {
            let promised = distinct(updater.all_elements());
            let flushed = match step {
                Step::Add(v) => { updater.add(*v); false }
                Step::Update(v) => { updater.update(*v); false }
                Step::Remove(v) => { updater.remove(*v); false }
                Step::RemoveAll => { prop_assert!(updater.remove_all().is_ok()); false }
                Step::UpdateAll => { updater.update_all(); false }
                Step::Advance(ms) => { clock.advance(Duration::from_millis(*ms)); false }
                Step::Poll => {
                    let ran = updater.poll();
                    prop_assert!(ran.is_ok());
                    ran.unwrap_or(false)
                }
                Step::Flush => { prop_assert!(updater.flush().is_ok()); true }
            };
            if flushed {
                prop_assert_eq!(distinct(updater.model().to_vec()), promised);
                prop_assert!(!updater.has_pending());
                prop_assert_eq!(distinct(updater.all_not_changed()), distinct(updater.model().to_vec()));
            }
        }
        prop_assert!(updater.flush().is_ok());
        prop_assert!(!updater.has_pending());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Throttling
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn scheduled_flushes_respect_period(steps in proptest::collection::vec(step(), 0..80)) {
        let (updater, clock) = setup();
        let mut last: Option<Duration> = None;
        for step in &steps {
            match step {
                Step::Add(v) => updater.add(*v),
                Step::Update(v) => updater.update(*v),
                Step::Remove(v) => updater.remove(*v),
                Step::Advance(ms) => clock.advance(Duration::from_millis(*ms)),
                Step::Poll => {
                    if updater.poll().unwrap_or(false) {
                        let now = clock.elapsed();
                        if let Some(previous) = last {
                            prop_assert!(now - previous >= PERIOD);
                        }
                        last = Some(now);
                    }
                }
                // Explicit flushes bypass the schedule; leave them out.
                Step::RemoveAll | Step::UpdateAll | Step::Flush => {}
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Event replay
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn events_replay_model(steps in proptest::collection::vec(step(), 0..60)) {
        let (updater, clock) = setup();
        let model = updater.model();
        let copy = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&copy);
        let probe = model.clone();
        let _sub = model.listen(move |event: &ListEvent<u8>| {
            event.apply_to(&mut sink.borrow_mut(), &probe);
            Ok(())
        });
        for step in &steps {
            let result = match step {
                Step::Add(v) => { updater.add(*v); Ok(()) }
                Step::Update(v) => { updater.update(*v); Ok(()) }
                Step::Remove(v) => { updater.remove(*v); Ok(()) }
                Step::RemoveAll => updater.remove_all(),
                Step::UpdateAll => { updater.update_all(); Ok(()) }
                Step::Advance(ms) => { clock.advance(Duration::from_millis(*ms)); Ok(()) }
                Step::Poll => updater.poll().map(drop),
                Step::Flush => updater.flush(),
            };
            prop_assert!(result.is_ok());
            prop_assert_eq!(&*copy.borrow(), &model.to_vec());
        }
    }
}
