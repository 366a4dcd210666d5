//! # Subscriptions
//!
//! Fan-out of committed operations to registered subscribers.
//!
//! Every subscription owns a bounded dispatch queue and a dispatcher task.
//! The applier only ever calls `try_send` on the queue, so a slow subscriber
//! can never hold up a commit. The dispatcher forwards queued operations to
//! the subscriber's output channel in commit order, racing every step against
//! the subscription's teardown signal so that it exits promptly once the
//! subscription is destroyed, whether or not anybody is reading.

use agoni_core::{matches_all, Filter, Operation};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::stats::StoreCounters;

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SubscriptionEntry {
    filters: Arc<[Filter]>,
    dispatch_tx: mpsc::Sender<Operation>,
}

/// Live subscriptions of a store
pub(crate) struct SubscriptionRegistry {
    entries: RwLock<HashMap<SubscriptionId, SubscriptionEntry>>,
    queue_capacity: usize,
    counters: Arc<StoreCounters>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(queue_capacity: usize, counters: Arc<StoreCounters>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            queue_capacity,
            counters,
        }
    }

    /// Registers a subscription and spawns its dispatcher.
    pub(crate) fn register(
        self: &Arc<Self>,
        filters: Vec<Filter>,
        output: mpsc::Sender<Operation>,
    ) -> Subscription {
        let id = SubscriptionId::new();
        let filters: Arc<[Filter]> = filters.into();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.queue_capacity);
        let (teardown_tx, teardown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch(
            id,
            dispatch_rx,
            output,
            teardown_rx,
            self.counters.clone(),
        ));

        self.entries.write().insert(
            id,
            SubscriptionEntry {
                filters: filters.clone(),
                dispatch_tx,
            },
        );

        debug!("Subscription {} registered with filters {:?}", id, filters);

        Subscription {
            id,
            filters,
            teardown_tx,
            dispatcher: Some(dispatcher),
            registry: Arc::downgrade(self),
        }
    }

    pub(crate) fn unregister(&self, id: SubscriptionId) {
        if self.entries.write().remove(&id).is_some() {
            debug!("Subscription {} removed", id);
        }
    }

    /// Queues `operation` for every subscription whose filters all match.
    ///
    /// Never waits: a full queue drops the notification, a closed one drops
    /// the subscription's entry.
    pub(crate) fn fan_out(&self, operation: &Operation) {
        let mut closed = Vec::new();
        let mut dropped = 0;

        {
            let entries = self.entries.read();
            for (id, entry) in entries.iter() {
                if !matches_all(&entry.filters, operation) {
                    continue;
                }
                match entry.dispatch_tx.try_send(operation.clone()) {
                    Ok(()) => self.counters.record_dispatched(),
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        debug!(
                            "Dispatch queue for subscription {} is full, dropping {}",
                            id, operation
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        dropped += 1;
                        closed.push(*id);
                    }
                }
            }
        }

        if dropped > 0 {
            self.counters.record_dropped(dropped);
        }

        if !closed.is_empty() {
            let mut entries = self.entries.write();
            for id in closed {
                entries.remove(&id);
                debug!("Subscription {} dispatcher has exited, entry removed", id);
            }
        }
    }

    /// Drops every dispatch queue. Dispatchers forward what is already queued
    /// and then exit.
    pub(crate) fn clear(&self) {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        if count > 0 {
            debug!("Released {} subscriptions", count);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

async fn dispatch(
    id: SubscriptionId,
    mut queue: mpsc::Receiver<Operation>,
    output: mpsc::Sender<Operation>,
    mut teardown: watch::Receiver<bool>,
    counters: Arc<StoreCounters>,
) {
    loop {
        let operation = tokio::select! {
            biased;
            _ = teardown.wait_for(|destroyed| *destroyed) => break,
            next = queue.recv() => match next {
                Some(operation) => operation,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = teardown.wait_for(|destroyed| *destroyed) => break,
            sent = output.send(operation) => {
                if sent.is_err() {
                    debug!("Output channel of subscription {} is closed", id);
                    break;
                }
                counters.record_delivered();
            }
        }
    }

    debug!("Dispatcher for subscription {} stopped", id);
}

/// A registered interest in committed operations.
///
/// Operations matching every filter are delivered to the output channel the
/// subscription was registered with, in the order the store committed them.
/// Several subscriptions may share one output channel.
///
/// Destroy a subscription with [`Subscription::destroy`]. Dropping it has the
/// same effect on delivery, without waiting for the dispatcher to exit.
pub struct Subscription {
    id: SubscriptionId,
    filters: Arc<[Filter]>,
    teardown_tx: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<()>>,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns `true` when the dispatcher has stopped, for instance because
    /// the output channel was closed or the store shut down.
    pub fn is_finished(&self) -> bool {
        self.dispatcher
            .as_ref()
            .map_or(true, |dispatcher| dispatcher.is_finished())
    }

    /// Tears the subscription down.
    ///
    /// No further operations are delivered. A delivery blocked on a full
    /// output channel is abandoned. Resolves once the dispatcher has exited;
    /// the subscriber does not need to drain its channel.
    pub async fn destroy(mut self) {
        self.teardown();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                warn!("Dispatcher for subscription {} failed: {}", self.id, e);
            }
        }
        debug!("Subscription {} destroyed", self.id);
    }

    fn teardown(&mut self) {
        self.teardown_tx.send_replace(true);
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agoni_core::OperationKind;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    fn committed(ops: Vec<Operation>) -> Vec<Operation> {
        let mut state = HashMap::new();
        ops.into_iter()
            .enumerate()
            .map(|(i, op)| op.apply(&mut state, i as u64 + 1))
            .collect()
    }

    fn registry(capacity: usize) -> (Arc<SubscriptionRegistry>, Arc<StoreCounters>) {
        let counters = Arc::new(StoreCounters::default());
        (
            Arc::new(SubscriptionRegistry::new(capacity, counters.clone())),
            counters,
        )
    }

    #[tokio::test]
    async fn test_fan_out_respects_filters() {
        let (registry, _) = registry(16);
        let (tx, mut rx) = mpsc::channel(16);
        let subscription = registry.register(vec![Filter::kind(OperationKind::Update)], tx);

        for op in committed(vec![
            Operation::create("a", "1"),
            Operation::update("a", "2"),
            Operation::delete("a"),
        ]) {
            registry.fan_out(&op);
        }

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), OperationKind::Update);
        assert_eq!(received.sequence(), Some(2));

        subscription.destroy().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_notifications() {
        let (registry, counters) = registry(1);
        let (tx, _rx) = mpsc::channel(1);
        let subscription = registry.register(Vec::new(), tx);

        let ops = committed(
            (0..10)
                .map(|i| Operation::create(format!("k{i}"), "v"))
                .collect(),
        );
        for op in &ops {
            registry.fan_out(op);
        }

        let stats = counters.snapshot(registry.len());
        assert!(stats.notifications_dropped > 0);
        assert_eq!(
            stats.notifications_dispatched + stats.notifications_dropped,
            10
        );

        timeout(Duration::from_secs(1), subscription.destroy())
            .await
            .expect("destroy should not wait on an unread channel");
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let (registry, _) = registry(4);
        let (tx, _rx) = mpsc::channel(4);

        let subscription = registry.register(Vec::new(), tx);
        assert_eq!(registry.len(), 1);

        drop(subscription);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_clear_lets_dispatchers_finish() {
        let (registry, _) = registry(4);
        let (tx, mut rx) = mpsc::channel(4);
        let subscription = registry.register(Vec::new(), tx);

        let ops = committed(vec![Operation::create("a", "1")]);
        registry.fan_out(&ops[0]);
        registry.clear();

        assert_eq!(rx.recv().await.unwrap().key().as_str(), "a");
        timeout(Duration::from_secs(1), async {
            while !subscription.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("dispatcher should stop once its queue is released");
    }
}
