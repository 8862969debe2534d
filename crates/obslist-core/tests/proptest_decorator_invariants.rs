#![forbid(unsafe_code)]

//! Property-based invariant tests for the derived list views.
//!
//! Every property replays a random sequence of mutations on an [`OrderList`]
//! and checks the views built on top of it:
//!
//! 1. An event-replayed mirror of any list equals the list after every step.
//! 2. A filter view holds exactly the accepted source items, in source order.
//! 3. A sorted view is the stable sort of its source.
//! 4. A unique view holds the first occurrence of each distinct value.
//! 5. A second resynch with no source change fires nothing.
//! 6. A union holds each value exactly once while any source holds it.
//! 7. A segmented list is the concatenation of its segments; a list cannot
//!    be mounted twice.
//! 8. Full-list removals never shrink a subset; links and detached values
//!    stay consistent and the complement tracks the selection.
//! 9. Re-sorting an already ordered range fires an `Update`, never a
//!    `Rearrange`.

use std::cell::RefCell;
use std::rc::Rc;

use obslist_core::{
    ImageList, ListEvent, ListModel, OrderList, SegmentedList, SortedList, SubsetList, Subscription,
    UnionList, UniqueList,
};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Insert(usize, Vec<u8>),
    Remove(usize, usize),
    Replace(usize, u8),
    Swap(usize, usize),
    Move(usize, usize),
    Sort,
    RemoveWhere(u8),
}

/// Small value domain so duplicates are common.
fn value() -> impl Strategy<Value = u8> {
    0u8..8
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), proptest::collection::vec(value(), 1..6))
            .prop_map(|(at, items)| Op::Insert(at, items)),
        2 => (any::<usize>(), 1usize..4).prop_map(|(at, n)| Op::Remove(at, n)),
        2 => (any::<usize>(), value()).prop_map(|(at, v)| Op::Replace(at, v)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Swap(a, b)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Move(a, b)),
        1 => Just(Op::Sort),
        1 => value().prop_map(Op::RemoveWhere),
    ]
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op(), 0..40)
}

fn initial() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(value(), 0..12)
}

#[derive(Debug, Clone)]
enum SubsetOp {
    Full(Op),
    AddFromFull(usize),
    Add(u8),
    InsertAt(usize, u8),
    RemoveAt(usize),
    Swap(usize, usize),
}

fn subset_op() -> impl Strategy<Value = SubsetOp> {
    prop_oneof![
        4 => op().prop_map(SubsetOp::Full),
        2 => any::<usize>().prop_map(SubsetOp::AddFromFull),
        1 => value().prop_map(SubsetOp::Add),
        1 => (any::<usize>(), value()).prop_map(|(at, v)| SubsetOp::InsertAt(at, v)),
        2 => any::<usize>().prop_map(SubsetOp::RemoveAt),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| SubsetOp::Swap(a, b)),
    ]
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Apply `op` with indices folded into range; no-ops on an empty list.
fn apply(list: &OrderList<u8>, op: &Op) -> obslist_core::Result<()> {
    let len = list.len();
    match op {
        Op::Insert(at, items) => list.insert_all(at % (len + 1), items.clone()),
        Op::Remove(at, n) if len > 0 => {
            let from = at % len;
            list.remove_range(from, (from + n).min(len)).map(drop)
        }
        Op::Replace(at, v) if len > 0 => list.replace_at(at % len, *v).map(drop),
        Op::Swap(a, b) if len > 0 => list.swap(a % len, b % len),
        Op::Move(a, b) if len > 0 => list.move_item(a % len, b % len),
        Op::Sort => list.sort_by(u8::cmp),
        Op::RemoveWhere(v) => list.remove_where(|item| item == v).map(drop),
        _ => Ok(()),
    }
}

/// Keep a copy of `list` up to date purely from its events.
fn mirror<L: ListModel<u8> + Clone + 'static>(list: &L) -> (Rc<RefCell<Vec<u8>>>, Subscription) {
    let copy = Rc::new(RefCell::new(list.to_vec()));
    let sink = Rc::clone(&copy);
    let probe = list.clone();
    let sub = list.listen(move |event: &ListEvent<u8>| {
        event.apply_to(&mut sink.borrow_mut(), &probe);
        Ok(())
    });
    (copy, sub)
}

fn count_events<L: ListModel<u8>>(list: &L) -> (Rc<RefCell<Vec<ListEvent<u8>>>>, Subscription) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let sub = list.observe(Box::new(move |event: &ListEvent<u8>| {
        sink.borrow_mut().push(event.clone());
        Ok(())
    }));
    (log, sub)
}

fn first_occurrences(items: &[u8]) -> Vec<u8> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(item) {
            seen.push(*item);
        }
    }
    seen
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Event replay reproduces the backing list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn events_replay_backing_list(start in initial(), steps in ops()) {
        let list = OrderList::from_vec(start);
        let (copy, _sub) = mirror(&list);
        for step in &steps {
            prop_assert!(apply(&list, step).is_ok());
            prop_assert_eq!(&*copy.borrow(), &list.to_vec());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Filter view
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn filter_holds_accepted_items(start in initial(), steps in ops(), pivot in value()) {
        let source = OrderList::from_vec(start);
        let view = ImageList::filtered(source.clone(), move |item: &u8| *item >= pivot);
        let (copy, _sub) = mirror(&view);
        for step in &steps {
            prop_assert!(apply(&source, step).is_ok());
            let expected: Vec<u8> = source.to_vec().into_iter().filter(|item| *item >= pivot).collect();
            prop_assert_eq!(view.to_vec(), expected);
            prop_assert_eq!(&*copy.borrow(), &view.to_vec());
            prop_assert!(view.check_consistent().is_ok());
        }
    }

    #[test]
    fn predicate_change_matches_fresh_view(start in initial(), steps in ops(), a in value(), b in value()) {
        let source = OrderList::from_vec(start);
        let view = ImageList::filtered(source.clone(), move |item: &u8| *item >= a);
        for step in &steps {
            prop_assert!(apply(&source, step).is_ok());
        }
        prop_assert!(view.set_predicate(move |item: &u8| *item < b).is_ok());
        let fresh = ImageList::filtered(source.clone(), move |item: &u8| *item < b);
        prop_assert_eq!(view.to_vec(), fresh.to_vec());
        prop_assert!(view.check_consistent().is_ok());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Sorted view
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn sorted_view_is_stable_sort(start in initial(), steps in ops()) {
        let source = OrderList::from_vec(start);
        let view = SortedList::new(source.clone(), u8::cmp);
        let (copy, _sub) = mirror(&view);
        for step in &steps {
            prop_assert!(apply(&source, step).is_ok());
            let mut expected = source.to_vec();
            expected.sort();
            prop_assert_eq!(view.to_vec(), expected);
            prop_assert_eq!(&*copy.borrow(), &view.to_vec());
            prop_assert!(view.check_consistent().is_ok());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Unique view
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn unique_view_holds_first_occurrences(start in initial(), steps in ops()) {
        let source = OrderList::from_vec(start);
        let view = UniqueList::new(source.clone());
        let (copy, _sub) = mirror(&view);
        for step in &steps {
            prop_assert!(apply(&source, step).is_ok());
            prop_assert_eq!(view.to_vec(), first_occurrences(&source.to_vec()));
            prop_assert_eq!(&*copy.borrow(), &view.to_vec());
            prop_assert!(view.check_consistent().is_ok());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Resynch is idempotent
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn second_resynch_fires_nothing(start in initial(), steps in ops(), pivot in value()) {
        let source = OrderList::from_vec(start);
        let view = ImageList::filtered(source.clone(), move |item: &u8| *item % 2 == pivot % 2);
        for step in &steps {
            prop_assert!(apply(&source, step).is_ok());
        }
        prop_assert!(view.resynch().is_ok());
        let (log, _sub) = count_events(&view);
        prop_assert!(view.resynch().is_ok());
        prop_assert!(log.borrow().is_empty());

        let unique = UniqueList::new(source.clone());
        let (log, _sub) = count_events(&unique);
        prop_assert!(unique.resynch().is_ok());
        prop_assert!(log.borrow().is_empty());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Union
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn union_holds_each_value_once(
        left in initial(),
        right in initial(),
        steps in proptest::collection::vec((any::<bool>(), op()), 0..40),
    ) {
        let a = OrderList::from_vec(left);
        let b = OrderList::from_vec(right);
        let union = UnionList::new();
        prop_assert!(union.add_source("a", a.clone()).is_ok());
        prop_assert!(union.add_source("b", b.clone()).is_ok());
        let (copy, _sub) = mirror(&union);
        for (on_left, step) in &steps {
            let target = if *on_left { &a } else { &b };
            prop_assert!(apply(target, step).is_ok());

            let mut held = union.to_vec();
            held.sort_unstable();
            let mut expected: Vec<u8> = a.to_vec().into_iter().chain(b.to_vec()).collect();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(held, expected);
            prop_assert_eq!(&*copy.borrow(), &union.to_vec());
            prop_assert!(union.check_consistent().is_ok());
        }
        prop_assert!(union.remove_source(&"a").is_ok());
        prop_assert!(union.check_consistent().is_ok());
        prop_assert_eq!(union.len(), first_occurrences(&b.to_vec()).len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Segmented list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn segments_concatenate(
        left in initial(),
        right in initial(),
        steps in proptest::collection::vec((any::<bool>(), op()), 0..40),
    ) {
        let a = OrderList::from_vec(left);
        let b = OrderList::from_vec(right);
        let list = SegmentedList::new();
        prop_assert!(list.add_segment(a.clone()).is_ok());
        prop_assert!(list.add_segment(b.clone()).is_ok());
        prop_assert!(list.add_segment(a.clone()).is_err());
        let (copy, _sub) = mirror(&list);
        for (on_left, step) in &steps {
            let target = if *on_left { &a } else { &b };
            prop_assert!(apply(target, step).is_ok());
            let expected: Vec<u8> = a.to_vec().into_iter().chain(b.to_vec()).collect();
            prop_assert_eq!(list.to_vec(), expected);
            prop_assert_eq!(&*copy.borrow(), &list.to_vec());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 8. Subset and complement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn subset_stays_consistent(
        start in initial(),
        default_in_subset in any::<bool>(),
        steps in proptest::collection::vec(subset_op(), 0..40),
    ) {
        let full = OrderList::from_vec(start);
        let subset = SubsetList::new(full.clone(), default_in_subset);
        let complement = subset.complement();
        let (copy, _sub) = mirror(&subset);
        let (complement_copy, _complement_sub) = mirror(&complement);
        for step in &steps {
            let before = subset.len();
            let full_len = full.len();
            let len = subset.len();
            let result = match step {
                SubsetOp::Full(op) => {
                    let result = apply(&full, op);
                    if matches!(op, Op::Remove(..) | Op::RemoveWhere(_)) {
                        prop_assert_eq!(subset.len(), before);
                    }
                    result
                }
                SubsetOp::AddFromFull(i) if full_len > 0 => subset.add_from_full_set(&[i % full_len]),
                SubsetOp::Add(v) => subset.add(*v),
                SubsetOp::InsertAt(at, v) => subset.insert_from_complement(at % (len + 1), *v),
                SubsetOp::RemoveAt(i) if len > 0 => subset.remove_all_at(&[i % len]),
                SubsetOp::Swap(a, b) if len > 0 => subset.swap(a % len, b % len),
                _ => Ok(()),
            };
            prop_assert!(result.is_ok());
            prop_assert!(subset.check_consistent().is_ok());
            prop_assert_eq!(&*copy.borrow(), &subset.to_vec());
            prop_assert_eq!(&*complement_copy.borrow(), &complement.to_vec());

            let selected = subset.to_vec();
            let expected: Vec<u8> = full.to_vec().into_iter().filter(|item| !selected.contains(item)).collect();
            prop_assert_eq!(complement.to_vec(), expected);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 9. sort_or_update on ordered ranges
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ordered_range_only_updates(mut items in proptest::collection::vec(value(), 1..16), a in any::<usize>(), b in any::<usize>()) {
        items.sort_unstable();
        let len = items.len();
        let (low, high) = {
            let (x, y) = (a % len, b % len);
            (x.min(y), x.max(y))
        };
        let list = OrderList::from_vec(items.clone());
        let (log, _sub) = count_events(&list);
        prop_assert!(list.sort_or_update(low, high, u8::cmp).is_ok());
        prop_assert_eq!(list.to_vec(), items);
        let log = log.borrow();
        prop_assert_eq!(log.len(), 1);
        let is_update = matches!(log[0], ListEvent::Update { .. });
        prop_assert!(is_update);
    }
}
