// ============================================================================
// HISTORY BUFFER
// ============================================================================
// Fixed-capacity FIFO of snapshots, oldest first:
// - One writer (the broadcaster), any number of readers (request handlers)
// - Readers share the read lock and copy out `Arc` handles
// - An append holds the write lock across eviction and insertion, so readers
//   never see a missing slot or a length above capacity
// ============================================================================

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::snapshot::Snapshot;
use crate::DEFAULT_HISTORY_CAPACITY;

/// Bounded, insertion-ordered history of snapshots.
pub struct HistoryBuffer {
    entries: RwLock<VecDeque<Arc<Snapshot>>>,
    capacity: usize,
    /// Appends over the buffer's lifetime, including evicted entries
    total_appended: AtomicU64,
}

impl HistoryBuffer {
    /// Create an empty buffer. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_appended: AtomicU64::new(0),
        }
    }

    /// Insert at the newest end, evicting the single oldest entry when full.
    pub fn append(&self, snapshot: Arc<Snapshot>) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(snapshot);
        self.total_appended.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// The last `min(n, len)` entries, oldest first / newest last.
    pub fn recent(&self, n: usize) -> Vec<Arc<Snapshot>> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Point-in-time copy of the whole buffer, oldest first.
    pub fn all(&self) -> Vec<Arc<Snapshot>> {
        self.entries.read().iter().cloned().collect()
    }

    /// The most recently appended entry.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.entries.read().back().cloned()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn total_appended(&self) -> u64 {
        self.total_appended.load(AtomicOrdering::Relaxed)
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl Debug for HistoryBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("total_appended", &self.total_appended())
            .finish()
    }
}
