//! Identity-bearing ledger records.

use std::collections::BTreeMap;

/// A record that keeps its identity across state changes.
///
/// An account stays the same account when renamed or deactivated; a journal
/// entry keeps its id from draft through posted to voided.
pub trait Entity {
    type Id: Copy + Ord + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// Borrowing lookup table keyed by entity id. Later duplicates win.
pub fn index_by_id<E: Entity>(items: &[E]) -> BTreeMap<E::Id, &E> {
    items.iter().map(|e| (*e.id(), e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Row(u32, &'static str);

    impl Entity for Row {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.0
        }
    }

    #[test]
    fn index_keys_by_id() {
        let rows = [Row(2, "b"), Row(1, "a")];
        let index = index_by_id(&rows);
        assert_eq!(index.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(index[&2].1, "b");
    }
}
