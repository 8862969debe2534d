#![forbid(unsafe_code)]

//! Bidirectional map between full-list indices and subset indices.

use std::collections::BTreeMap;

/// One-to-one map `full index <-> subset index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwoWayIndexMap {
    by_full: BTreeMap<usize, usize>,
    by_subset: BTreeMap<usize, usize>,
}

impl TwoWayIndexMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_full.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_full.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_full.clear();
        self.by_subset.clear();
    }

    /// Link `full` and `subset`, dropping any previous link of either side.
    pub fn insert(&mut self, full: usize, subset: usize) {
        self.remove_full(full);
        self.remove_subset(subset);
        self.by_full.insert(full, subset);
        self.by_subset.insert(subset, full);
    }

    #[must_use]
    pub fn subset_of(&self, full: usize) -> Option<usize> {
        self.by_full.get(&full).copied()
    }

    #[must_use]
    pub fn full_of(&self, subset: usize) -> Option<usize> {
        self.by_subset.get(&subset).copied()
    }

    #[must_use]
    pub fn contains_full(&self, full: usize) -> bool {
        self.by_full.contains_key(&full)
    }

    /// Unlink by full index; returns the subset index it was linked to.
    pub fn remove_full(&mut self, full: usize) -> Option<usize> {
        let subset = self.by_full.remove(&full)?;
        self.by_subset.remove(&subset);
        Some(subset)
    }

    /// Unlink by subset index; returns the full index it was linked to.
    pub fn remove_subset(&mut self, subset: usize) -> Option<usize> {
        let full = self.by_subset.remove(&subset)?;
        self.by_full.remove(&full);
        Some(full)
    }

    /// Pairs `(full, subset)` in full-index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.by_full.iter().map(|(&f, &s)| (f, s))
    }

    /// Rewrite every link through `f(full, subset) -> (full, subset)`.
    pub fn remap(&mut self, f: impl Fn(usize, usize) -> (usize, usize)) {
        let pairs: Vec<(usize, usize)> = self.iter().map(|(full, subset)| f(full, subset)).collect();
        self.clear();
        for (full, subset) in pairs {
            self.by_full.insert(full, subset);
            self.by_subset.insert(subset, full);
        }
    }

    /// Add `diff` to every full index `>= from`.
    pub fn shift_full(&mut self, from: usize, diff: isize) {
        self.remap(|full, subset| {
            let full = if full >= from { full.saturating_add_signed(diff) } else { full };
            (full, subset)
        });
    }

    /// Add `diff` to every subset index `>= from`.
    pub fn shift_subset(&mut self, from: usize, diff: isize) {
        self.remap(|full, subset| {
            let subset = if subset >= from { subset.saturating_add_signed(diff) } else { subset };
            (full, subset)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_symmetric() {
        let mut map = TwoWayIndexMap::new();
        map.insert(4, 0);
        map.insert(7, 1);
        assert_eq!(map.subset_of(7), Some(1));
        assert_eq!(map.full_of(0), Some(4));
        map.insert(9, 1);
        assert_eq!(map.subset_of(7), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.remove_subset(0), Some(4));
        assert!(!map.contains_full(4));
    }

    #[test]
    fn shifting_moves_only_tail() {
        let mut map = TwoWayIndexMap::new();
        map.insert(1, 0);
        map.insert(5, 1);
        map.shift_full(3, 2);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(1, 0), (7, 1)]);
        map.shift_subset(1, 1);
        assert_eq!(map.full_of(0), Some(1));
        assert_eq!(map.full_of(2), Some(7));
        assert_eq!(map.full_of(1), None);
    }
}
