//! Transport node counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for monitoring one transport node.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Messages accepted onto the queue.
    pub messages_pushed: AtomicU64,
    /// Messages delivered to the transport.
    pub messages_processed: AtomicU64,
    /// Drains run, including immediate re-entries.
    pub drains: AtomicU64,
    /// Drains that stopped at the throughput quota.
    pub yields: AtomicU64,
    /// Submissions refused because the node had finished.
    pub rejected: AtomicU64,
    /// Queued messages acknowledged unprocessed when the node finished.
    pub discarded: AtomicU64,
}

impl TransportMetrics {
    /// Returns messages pushed.
    #[must_use]
    pub fn messages_pushed(&self) -> u64 {
        self.messages_pushed.load(Ordering::Relaxed)
    }

    /// Returns messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Returns drains run.
    #[must_use]
    pub fn drains(&self) -> u64 {
        self.drains.load(Ordering::Relaxed)
    }

    /// Returns quota yields.
    #[must_use]
    pub fn yields(&self) -> u64 {
        self.yields.load(Ordering::Relaxed)
    }

    /// Returns rejected submissions.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Returns discarded messages.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Copies every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_pushed: self.messages_pushed(),
            messages_processed: self.messages_processed(),
            drains: self.drains(),
            yields: self.yields(),
            rejected: self.rejected(),
            discarded: self.discarded(),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages accepted onto the queue.
    pub messages_pushed: u64,
    /// Messages delivered to the transport.
    pub messages_processed: u64,
    /// Drains run.
    pub drains: u64,
    /// Drains that stopped at the throughput quota.
    pub yields: u64,
    /// Submissions refused after finishing.
    pub rejected: u64,
    /// Messages dropped unprocessed at finish.
    pub discarded: u64,
}

impl std::ops::Add for MetricsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            messages_pushed: self.messages_pushed + rhs.messages_pushed,
            messages_processed: self.messages_processed + rhs.messages_processed,
            drains: self.drains + rhs.drains,
            yields: self.yields + rhs.yields,
            rejected: self.rejected + rhs.rejected,
            discarded: self.discarded + rhs.discarded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let m = TransportMetrics::default();
        TransportMetrics::incr(&m.messages_pushed);
        TransportMetrics::incr(&m.messages_pushed);
        TransportMetrics::incr(&m.yields);
        let snap = m.snapshot();
        assert_eq!(snap.messages_pushed, 2);
        assert_eq!(snap.yields, 1);
        assert_eq!(snap.rejected, 0);

        let total = snap + snap;
        assert_eq!(total.messages_pushed, 4);
    }
}
