//! Node statistics.
//!
//! Counters are atomic and can be read while the indexer runs. All of them
//! only grow, except `open_snapshots`, which is a gauge.
//!
//! ```rust,ignore
//! let node = Node::open_in_memory()?;
//! node.submit_tx(&ops)?;
//! node.sync(None)?;
//!
//! let stats = node.stats()?;
//! println!("committed: {}", stats.transactions_committed);
//! ```

use crate::types::BitemporalInstant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters of a node.
#[derive(Debug, Default)]
pub struct NodeStats {
    transactions_submitted: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    documents_evicted: AtomicU64,
    /// Shared with every snapshot, which decrements it on drop.
    open_snapshots: Arc<AtomicU64>,
}

impl NodeStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.transactions_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_indexed(&self, committed: bool) {
        let counter = if committed {
            &self.transactions_committed
        } else {
            &self.transactions_aborted
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, documents: u64) {
        self.documents_evicted.fetch_add(documents, Ordering::Relaxed);
    }

    pub(crate) fn open_snapshots_counter(&self) -> &Arc<AtomicU64> {
        &self.open_snapshots
    }

    /// Transactions appended by this node since it opened.
    pub fn transactions_submitted(&self) -> u64 {
        self.transactions_submitted.load(Ordering::Relaxed)
    }

    /// Transactions indexed as committed, including replayed ones.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Transactions indexed as aborted, including replayed ones.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Document bodies dropped after evictions.
    pub fn documents_evicted(&self) -> u64 {
        self.documents_evicted.load(Ordering::Relaxed)
    }

    /// Snapshots currently alive.
    pub fn open_snapshots(&self) -> u64 {
        self.open_snapshots.load(Ordering::Relaxed)
    }
}

/// A point-in-time copy of a node's statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions appended since open.
    pub transactions_submitted: u64,
    /// Transactions indexed as committed.
    pub transactions_committed: u64,
    /// Transactions indexed as aborted.
    pub transactions_aborted: u64,
    /// Document bodies dropped after evictions.
    pub documents_evicted: u64,
    /// Snapshots currently alive.
    pub open_snapshots: u64,
    /// Entities with at least one indexed version.
    pub entity_count: u64,
    /// Size of the transaction log in bytes.
    pub log_size: u64,
    /// Latest appended transaction.
    pub latest_submitted: Option<BitemporalInstant>,
    /// Latest indexed transaction.
    pub latest_indexed: Option<BitemporalInstant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = NodeStats::new();
        assert_eq!(stats.transactions_submitted(), 0);
        assert_eq!(stats.transactions_committed(), 0);
        assert_eq!(stats.open_snapshots(), 0);
    }

    #[test]
    fn outcomes_are_counted_separately() {
        let stats = NodeStats::new();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_indexed(true);
        stats.record_indexed(false);
        stats.record_evicted(3);

        assert_eq!(stats.transactions_submitted(), 2);
        assert_eq!(stats.transactions_committed(), 1);
        assert_eq!(stats.transactions_aborted(), 1);
        assert_eq!(stats.documents_evicted(), 3);
    }

    #[test]
    fn concurrent_updates() {
        use std::thread;

        let stats = Arc::new(NodeStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_submitted();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.transactions_submitted(), 800);
    }
}
