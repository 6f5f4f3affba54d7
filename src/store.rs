//! Append-only value store with O(1) de-duplication.
//!
//! The store is the source of truth for "what has this node seen". It
//! holds no lock of its own: the node wraps the store and the neighbor
//! table in a single coarse mutex, so every mutation and every
//! consistent read happens under that lock.

use std::collections::HashSet;

/// The unit of broadcast.
pub type Value = u64;

/// Ordered, append-only log of broadcast values plus a membership set.
///
/// Index `i` of the log is version `i + 1`; the current version equals
/// the log length. Entries are never reordered or removed, and the
/// `seen` set always mirrors the log's contents.
#[derive(Debug, Default)]
pub struct ValueStore {
    log: Vec<Value>,
    seen: HashSet<Value>,
}

impl ValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` iff it has not been seen before.
    ///
    /// Returns `true` if the value was appended, `false` on a duplicate.
    /// O(1) amortized.
    pub fn append_if_new(&mut self, value: Value) -> bool {
        if !self.seen.insert(value) {
            return false;
        }
        self.log.push(value);
        true
    }

    /// Copy of the full log, for read replies.
    pub fn snapshot(&self) -> Vec<Value> {
        self.log.clone()
    }

    /// The log entries past `version`, oldest first.
    ///
    /// Empty when `version` equals the log length. Callers validate the
    /// cursor first (see [`compute_delta`](crate::compute_delta)); an
    /// out-of-range version reads as empty rather than panicking on
    /// peer-supplied input.
    pub fn suffix_from(&self, version: u64) -> &[Value] {
        let start = (version as usize).min(self.log.len());
        &self.log[start..]
    }

    /// Current version number, i.e. the log length.
    pub fn version(&self) -> u64 {
        self.log.len() as u64
    }

    /// Whether `value` has been seen.
    pub fn contains(&self, value: Value) -> bool {
        self.seen.contains(&value)
    }

    /// Number of distinct values stored.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
