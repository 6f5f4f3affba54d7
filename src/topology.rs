//! Neighbor table: topology membership plus per-neighbor sync cursors.

use std::collections::BTreeMap;

/// Per-neighbor replication state.
///
/// One entry per peer named in the most recent topology message. The
/// cursor is the version number up to which this node believes the
/// neighbor (or itself, depending on direction) is caught up; it is
/// mutated only by the anti-entropy engine and is monotonically
/// non-decreasing under correct operation. Cursors arrive from
/// untrusted peers, so the engine re-validates them against the local
/// log on every use.
#[derive(Debug, Default)]
pub struct NeighborTable {
    // BTreeMap for deterministic iteration in tests; cycle order is
    // shuffled by the engine anyway.
    neighbors: BTreeMap<String, u64>,
}

impl NeighborTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the neighbor set with `ids`.
    ///
    /// Last-write-wins on the membership: ids absent from `ids` are
    /// dropped. Cursors of surviving ids are preserved so an unchanged
    /// neighbor does not get re-sent its whole log; new ids start at
    /// cursor 0. Idempotent on identical input.
    pub fn install<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut next = BTreeMap::new();
        for id in ids {
            let cursor = self.neighbors.get(&id).copied().unwrap_or(0);
            next.insert(id, cursor);
        }
        self.neighbors = next;
    }

    /// Cursor for `id`, if it is a known neighbor.
    pub fn cursor(&self, id: &str) -> Option<u64> {
        self.neighbors.get(id).copied()
    }

    /// Update the cursor for `id`.
    ///
    /// Returns `false` (and leaves the table unchanged) when `id` is not
    /// a known neighbor, e.g. a stray sync from a node outside the
    /// installed topology.
    pub fn set_cursor(&mut self, id: &str, cursor: u64) -> bool {
        match self.neighbors.get_mut(id) {
            Some(entry) => {
                *entry = cursor;
                true
            }
            None => false,
        }
    }

    /// Snapshot of `(id, cursor)` pairs for one engine tick.
    pub fn cursors(&self) -> Vec<(String, u64)> {
        self.neighbors
            .iter()
            .map(|(id, cursor)| (id.clone(), *cursor))
            .collect()
    }

    /// Neighbor ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.neighbors.keys().map(String::as_str)
    }

    /// Number of neighbors.
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether a topology has been installed yet.
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_install_starts_cursors_at_zero() {
        let mut table = NeighborTable::new();
        table.install(ids(&["n2", "n3"]));

        assert_eq!(table.len(), 2);
        assert_eq!(table.cursor("n2"), Some(0));
        assert_eq!(table.cursor("n3"), Some(0));
        assert_eq!(table.cursor("n4"), None);
    }

    #[test]
    fn test_reinstall_preserves_surviving_cursors() {
        let mut table = NeighborTable::new();
        table.install(ids(&["n2", "n3"]));
        table.set_cursor("n2", 7);
        table.set_cursor("n3", 4);

        table.install(ids(&["n2", "n4"]));

        assert_eq!(table.cursor("n2"), Some(7));
        assert_eq!(table.cursor("n3"), None);
        assert_eq!(table.cursor("n4"), Some(0));
    }

    #[test]
    fn test_reinstall_identical_is_idempotent() {
        let mut table = NeighborTable::new();
        table.install(ids(&["n2"]));
        table.set_cursor("n2", 3);
        table.install(ids(&["n2"]));

        assert_eq!(table.cursor("n2"), Some(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_set_cursor_unknown_id_is_noop() {
        let mut table = NeighborTable::new();
        table.install(ids(&["n2"]));

        assert!(!table.set_cursor("n9", 5));
        assert_eq!(table.cursor("n9"), None);
        assert_eq!(table.cursor("n2"), Some(0));
    }

    #[test]
    fn test_cursors_snapshot() {
        let mut table = NeighborTable::new();
        table.install(ids(&["n3", "n2"]));
        table.set_cursor("n3", 2);

        let snapshot = table.cursors();
        assert_eq!(
            snapshot,
            vec![("n2".to_string(), 0), ("n3".to_string(), 2)]
        );
    }
}
