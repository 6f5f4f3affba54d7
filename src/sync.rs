//! Delta computation and application for the anti-entropy engine.
//!
//! Both directions of the protocol share one delta shape: given a
//! remote-reported cursor and the local log, the delta carries the
//! missing suffix plus the sender's current log length. The receiver
//! merges the suffix through the de-dup set and advances its cursor for
//! the sender, which makes concurrent deltas from multiple neighbors
//! idempotent and commutative: the final log content is a set union,
//! while the append order is a function of arrival order.

use crate::error::{Error, Result};
use crate::store::{Value, ValueStore};
use crate::topology::NeighborTable;

/// The missing suffix of a log plus the sender's cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDelta {
    /// The sender's log length at computation time.
    ///
    /// Returned so the receiver can advance its bookkeeping of how far
    /// the sender is now caught up.
    pub cursor: u64,
    /// Log entries past the remote cursor, oldest first.
    pub values: Vec<Value>,
}

impl SyncDelta {
    /// Whether the remote side was already fully caught up.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Compute the delta between `remote_cursor` and the local log.
///
/// - `remote_cursor == len`: empty delta, remote is caught up.
/// - `remote_cursor < len`: delta carries `log[remote_cursor..]`.
/// - `remote_cursor > len`: the remote claims more than we have;
///   rejected with [`Error::InconsistentCursor`], nothing mutated.
pub fn compute_delta(remote_cursor: u64, store: &ValueStore) -> Result<SyncDelta> {
    let local = store.version();
    if remote_cursor > local {
        return Err(Error::InconsistentCursor {
            remote: remote_cursor,
            local,
        });
    }
    Ok(SyncDelta {
        cursor: local,
        values: store.suffix_from(remote_cursor).to_vec(),
    })
}

/// Merge a delta received from `peer` into local state.
///
/// Every value goes through [`ValueStore::append_if_new`], then the
/// peer's cursor is set to the reported position. Unknown peers (not in
/// the installed topology) still get their values merged; only the
/// cursor update is dropped.
///
/// Returns the number of values that were genuinely new.
pub fn apply_delta(
    store: &mut ValueStore,
    neighbors: &mut NeighborTable,
    peer: &str,
    delta: SyncDelta,
) -> usize {
    let mut merged = 0;
    for value in delta.values {
        if store.append_if_new(value) {
            merged += 1;
        }
    }
    neighbors.set_cursor(peer, delta.cursor);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(values: &[Value]) -> ValueStore {
        let mut store = ValueStore::new();
        for &v in values {
            store.append_if_new(v);
        }
        store
    }

    #[test]
    fn test_delta_caught_up() {
        let store = store_with(&[1, 2, 3]);
        let delta = compute_delta(3, &store).unwrap();

        assert_eq!(delta.cursor, 3);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_behind() {
        let store = store_with(&[1, 2, 3]);
        let delta = compute_delta(1, &store).unwrap();

        assert_eq!(delta.cursor, 3);
        assert_eq!(delta.values, vec![2, 3]);
    }

    #[test]
    fn test_delta_from_zero_is_whole_log() {
        let store = store_with(&[1, 2, 3]);
        let delta = compute_delta(0, &store).unwrap();

        assert_eq!(delta.cursor, 3);
        assert_eq!(delta.values, vec![1, 2, 3]);
    }

    #[test]
    fn test_delta_remote_ahead_is_rejected() {
        let store = store_with(&[1, 2, 3]);
        let err = compute_delta(5, &store).unwrap_err();

        assert!(matches!(
            err,
            Error::InconsistentCursor {
                remote: 5,
                local: 3
            }
        ));
        // Nothing mutated.
        assert_eq!(store.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn test_apply_merges_and_advances_cursor() {
        let mut store = store_with(&[1]);
        let mut neighbors = NeighborTable::new();
        neighbors.install(["n2".to_string()]);

        let merged = apply_delta(
            &mut store,
            &mut neighbors,
            "n2",
            SyncDelta {
                cursor: 3,
                values: vec![1, 2, 3],
            },
        );

        assert_eq!(merged, 2);
        assert_eq!(store.snapshot(), vec![1, 2, 3]);
        assert_eq!(neighbors.cursor("n2"), Some(3));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut store = ValueStore::new();
        let mut neighbors = NeighborTable::new();
        neighbors.install(["n2".to_string()]);

        let delta = SyncDelta {
            cursor: 2,
            values: vec![7, 8],
        };
        apply_delta(&mut store, &mut neighbors, "n2", delta.clone());
        let merged = apply_delta(&mut store, &mut neighbors, "n2", delta);

        assert_eq!(merged, 0);
        assert_eq!(store.snapshot(), vec![7, 8]);
    }

    #[test]
    fn test_round_trip_reproduces_suffix_as_set() {
        let source = store_with(&[4, 9, 1, 7, 2]);

        for r in 0..=source.version() {
            let mut target = ValueStore::new();
            let mut neighbors = NeighborTable::new();
            neighbors.install(["src".to_string()]);
            for &v in source.suffix_from(0)[..r as usize].iter() {
                target.append_if_new(v);
            }

            let delta = compute_delta(r, &source).unwrap();
            assert_eq!(delta.values.len() as u64, source.version() - r);
            apply_delta(&mut target, &mut neighbors, "src", delta);

            assert_eq!(target.snapshot(), source.snapshot());
        }
    }
}
