//! # Store Statistics
//!
//! Counters updated by the applier and the subscription dispatchers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the store's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub committed_operations: u64,
    pub failed_operations: u64,
    /// Notifications queued for a subscription's dispatcher
    pub notifications_dispatched: u64,
    /// Notifications pushed onto a subscriber's output channel
    pub notifications_delivered: u64,
    /// Notifications discarded because a dispatch queue was full or closed
    pub notifications_dropped: u64,
    pub active_subscriptions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    committed: AtomicU64,
    failed: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl StoreCounters {
    pub(crate) fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_subscriptions: usize) -> StoreStats {
        StoreStats {
            committed_operations: self.committed.load(Ordering::Relaxed),
            failed_operations: self.failed.load(Ordering::Relaxed),
            notifications_dispatched: self.dispatched.load(Ordering::Relaxed),
            notifications_delivered: self.delivered.load(Ordering::Relaxed),
            notifications_dropped: self.dropped.load(Ordering::Relaxed),
            active_subscriptions,
        }
    }
}
