//! # Store Engine
//!
//! The key-value store and its applier task.
//!
//! Every mutation and every read travels through one bounded channel to a
//! single applier task, which is the only owner of the key/value mapping.
//! Requests are handled strictly in arrival order; checking a key and
//! mutating it happen inside one step of that task, so concurrent callers
//! can neither lose updates nor create a key twice.

use agoni_core::{Filter, Key, Operation, Result, StoreError, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::KVStoreConfig;
use crate::stats::{StoreCounters, StoreStats};
use crate::subscription::{Subscription, SubscriptionRegistry};

/// Requests handled by the applier
enum StoreCommand {
    Commit {
        operation: Operation,
        response_tx: oneshot::Sender<Operation>,
    },
    Get {
        key: Key,
        response_tx: oneshot::Sender<Option<Value>>,
    },
    Len(oneshot::Sender<usize>),
    Snapshot(oneshot::Sender<HashMap<Key, Value>>),
}

/// Sole owner of the key/value mapping
struct Applier {
    state: HashMap<Key, Value>,
    command_rx: mpsc::Receiver<StoreCommand>,
    shutdown_rx: watch::Receiver<bool>,
    subscriptions: Arc<SubscriptionRegistry>,
    counters: Arc<StoreCounters>,
    enable_notifications: bool,
    next_sequence: u64,
}

impl Applier {
    async fn run(mut self) {
        info!("Store applier started");

        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown_rx.wait_for(|closed| *closed) => None,
                command = self.command_rx.recv() => command,
            };
            match command {
                Some(command) => self.handle_command(command),
                None => break,
            }
        }

        // Requests handed off before shutdown are still served
        self.command_rx.close();
        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command);
        }

        self.subscriptions.clear();
        info!(
            "Store applier stopped after {} commits",
            self.next_sequence - 1
        );
    }

    fn handle_command(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Commit {
                operation,
                response_tx,
            } => {
                let operation = self.apply(operation);
                let _ = response_tx.send(operation);
            }
            StoreCommand::Get { key, response_tx } => {
                let _ = response_tx.send(self.state.get(&key).cloned());
            }
            StoreCommand::Len(response_tx) => {
                let _ = response_tx.send(self.state.len());
            }
            StoreCommand::Snapshot(response_tx) => {
                let _ = response_tx.send(self.state.clone());
            }
        }
    }

    fn apply(&mut self, operation: Operation) -> Operation {
        let operation = operation.apply(&mut self.state, self.next_sequence);

        if operation.is_committed() {
            self.next_sequence += 1;
            self.counters.record_committed();
            debug!("Committed {} ({})", operation, operation.id());

            if self.enable_notifications {
                self.subscriptions.fan_out(&operation);
            }
        } else {
            self.counters.record_failed();
            debug!(
                "Rejected {} ({}): {:?}",
                operation,
                operation.id(),
                operation.error()
            );
        }

        operation
    }
}

/// In-memory key-value store with a single serialized writer.
///
/// Operations are built with [`create`](Self::create),
/// [`update`](Self::update) and [`delete`](Self::delete), then submitted
/// with [`commit`](Self::commit), which resolves once the applier has
/// committed or rejected them. Committed operations are fanned out to
/// matching [`Subscription`]s.
pub struct KeyValueStore {
    config: KVStoreConfig,
    command_tx: mpsc::Sender<StoreCommand>,
    subscriptions: Arc<SubscriptionRegistry>,
    counters: Arc<StoreCounters>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    applier: Mutex<Option<JoinHandle<()>>>,
}

impl KeyValueStore {
    /// Create an empty store and start its applier.
    pub async fn new(config: KVStoreConfig) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(StoreCounters::default());
        let subscriptions = Arc::new(SubscriptionRegistry::new(
            config.subscription_buffer,
            counters.clone(),
        ));

        let applier = Applier {
            state: HashMap::new(),
            command_rx,
            shutdown_rx,
            subscriptions: subscriptions.clone(),
            counters: counters.clone(),
            enable_notifications: config.enable_notifications,
            next_sequence: 1,
        };
        let handle = tokio::spawn(applier.run());

        info!("KeyValueStore initialized with config: {:?}", config);

        Ok(Self {
            config,
            command_tx,
            subscriptions,
            counters,
            closed: AtomicBool::new(false),
            shutdown_tx,
            applier: Mutex::new(Some(handle)),
        })
    }

    /// Build an operation that inserts `key`. Fails with `KeyExists` on
    /// commit if the key is present at that point.
    pub fn create(&self, key: impl Into<Key>, value: impl Into<Value>) -> Operation {
        Operation::create(key, value)
    }

    /// Build an operation that replaces the value of `key`. Fails with
    /// `KeyNotFound` on commit if the key is absent at that point.
    pub fn update(&self, key: impl Into<Key>, value: impl Into<Value>) -> Operation {
        Operation::update(key, value)
    }

    /// Build an operation that removes `key`. Fails with `KeyNotFound` on
    /// commit if the key is absent at that point.
    pub fn delete(&self, key: impl Into<Key>) -> Operation {
        Operation::delete(key)
    }

    /// Hand `operation` to the applier and wait for its outcome.
    ///
    /// The returned operation is `Committed` or `Failed`. Once the store is
    /// closed every operation fails with [`StoreError::EngineClosed`].
    /// Operations that are not `Ready` are returned as they are.
    ///
    /// `EngineClosed` rejections count towards
    /// [`StoreStats::failed_operations`] like any other failure.
    pub async fn commit(&self, operation: Operation) -> Operation {
        if !operation.is_ready() {
            warn!(
                "Ignoring commit of {} ({}): operation is not ready",
                operation,
                operation.id()
            );
            return operation;
        }

        if self.is_closed() {
            return self.reject_closed(operation);
        }

        let pending = operation.clone();
        let (response_tx, response_rx) = oneshot::channel();
        let command = StoreCommand::Commit {
            operation,
            response_tx,
        };

        if self.command_tx.send(command).await.is_err() {
            return self.reject_closed(pending);
        }

        match response_rx.await {
            Ok(operation) => operation,
            Err(_) => self.reject_closed(pending),
        }
    }

    fn reject_closed(&self, operation: Operation) -> Operation {
        self.counters.record_failed();
        debug!("Rejected {} ({}): store is closed", operation, operation.id());
        operation.reject(StoreError::EngineClosed)
    }

    pub async fn create_and_commit(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Operation {
        self.commit(self.create(key, value)).await
    }

    pub async fn update_and_commit(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Operation {
        self.commit(self.update(key, value)).await
    }

    pub async fn delete_and_commit(&self, key: impl Into<Key>) -> Operation {
        self.commit(self.delete(key)).await
    }

    /// Value currently stored under `key`
    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        self.query(|response_tx| StoreCommand::Get { key, response_tx })
            .await
    }

    pub async fn contains_key(&self, key: impl Into<Key>) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    pub async fn len(&self) -> Result<usize> {
        self.query(StoreCommand::Len).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Copy of the whole mapping at the current point of the commit order
    pub async fn snapshot(&self) -> Result<HashMap<Key, Value>> {
        self.query(StoreCommand::Snapshot).await
    }

    async fn query<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T> {
        if self.is_closed() {
            return Err(StoreError::EngineClosed);
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| StoreError::EngineClosed)?;
        response_rx.await.map_err(|_| StoreError::EngineClosed)
    }

    /// Register interest in committed operations matching all `filters`.
    ///
    /// Matching operations are sent to `output` in commit order. An empty
    /// filter list matches everything. The output channel belongs to the
    /// caller and may be shared between subscriptions.
    pub fn subscribe(&self, filters: Vec<Filter>, output: mpsc::Sender<Operation>) -> Subscription {
        self.subscriptions.register(filters, output)
    }

    /// Like [`subscribe`](Self::subscribe), creating the output channel with
    /// room for `capacity` operations.
    pub fn subscribe_channel(
        &self,
        filters: Vec<Filter>,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Operation>) {
        let (output, receiver) = mpsc::channel(capacity);
        (self.subscribe(filters, output), receiver)
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot(self.subscriptions.len())
    }

    pub fn config(&self) -> &KVStoreConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting operations.
    ///
    /// Operations already handed to the applier are applied before it exits;
    /// this resolves once it has. Closing is irreversible; a second call only
    /// logs a warning, and still waits for the applier if an earlier call was
    /// cancelled before it finished.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("KeyValueStore is already closed");
        } else {
            info!("Closing KeyValueStore");
            self.shutdown_tx.send_replace(true);
        }

        // the handle stays in place until the applier has been joined
        let mut applier = self.applier.lock().await;
        if let Some(handle) = applier.as_mut() {
            if let Err(e) = handle.await {
                error!("Store applier terminated abnormally: {}", e);
            }
            *applier = None;
        }
        info!("KeyValueStore closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agoni_core::{OperationKind, OperationStatus};
    use futures_util::FutureExt;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn store() -> KeyValueStore {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .try_init();
        KeyValueStore::new(KVStoreConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let store = store().await;

        let op = store.create("key1", "value1");
        assert_eq!(op.status(), OperationStatus::Ready);

        let op = store.commit(op).await;
        assert!(op.is_committed());
        assert_eq!(op.sequence(), Some(1));

        assert_eq!(store.get("key1").await.unwrap(), Some(Value::from("value1")));
        assert!(store.contains_key("key1").await.unwrap());

        let op = store.delete_and_commit("key1").await;
        assert!(op.is_committed());
        assert_eq!(op.old_value(), Some(&Value::from("value1")));

        assert!(store.get("key1").await.unwrap().is_none());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_documented_scenario() {
        let store = store().await;

        assert!(store.create_and_commit("a", "1").await.is_committed());

        let update = store.update_and_commit("a", "2").await;
        assert!(update.is_committed());
        assert_eq!(update.old_value(), Some(&Value::from("1")));

        let duplicate = store.create_and_commit("a", "3").await;
        assert!(duplicate.is_failed());
        assert_eq!(duplicate.error(), Some(&StoreError::key_exists("a")));
        assert_eq!(store.get("a").await.unwrap(), Some(Value::from("2")));

        let delete = store.delete_and_commit("a").await;
        assert_eq!(delete.old_value(), Some(&Value::from("2")));
        assert!(store.snapshot().await.unwrap().is_empty());

        let again = store.delete_and_commit("a").await;
        assert_eq!(again.error(), Some(&StoreError::key_not_found("a")));

        let stats = store.stats();
        assert_eq!(stats.committed_operations, 3);
        assert_eq!(stats.failed_operations, 2);
    }

    #[tokio::test]
    async fn test_commit_after_close_fails() {
        let store = store().await;
        store.create_and_commit("a", "1").await;

        store.close().await;
        assert!(store.is_closed());

        let op = store.update_and_commit("a", "2").await;
        assert!(op.is_failed());
        assert_eq!(op.error(), Some(&StoreError::EngineClosed));
        assert_eq!(store.get("a").await, Err(StoreError::EngineClosed));

        let stats = store.stats();
        assert_eq!(stats.committed_operations, 1);
        assert_eq!(stats.failed_operations, 1);

        store.delete_and_commit("a").await;
        assert_eq!(store.stats().failed_operations, 2);

        // second close is a no-op
        timeout(Duration::from_secs(1), store.close()).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_close_still_stops_applier() {
        let store = store().await;
        let (_subscription, mut rx) = store.subscribe_channel(Vec::new(), 8);
        store.create_and_commit("a", "1").await;

        // dropped after its first poll, while awaiting the applier
        assert!(store.close().now_or_never().is_none());
        assert!(store.is_closed());

        assert_eq!(rx.recv().await.unwrap().key().as_str(), "a");
        let released = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(released.is_none());

        timeout(Duration::from_secs(1), store.close()).await.unwrap();
        assert!(store.create_and_commit("b", "1").await.is_failed());
    }

    #[tokio::test]
    async fn test_terminal_operation_is_not_recommitted() {
        let store = store().await;

        let committed = store.create_and_commit("a", "1").await;
        let again = store.commit(committed.clone()).await;

        assert_eq!(again, committed);
        assert_eq!(store.stats().committed_operations, 1);
    }

    #[tokio::test]
    async fn test_subscription_receives_committed_operations_only() {
        let store = store().await;
        let (subscription, mut rx) =
            store.subscribe_channel(vec![Filter::kind(OperationKind::Create)], 8);

        store.create_and_commit("a", "1").await;
        store.create_and_commit("a", "1").await;
        store.update_and_commit("a", "2").await;
        store.create_and_commit("b", "1").await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.key().as_str(), "a");
        assert_eq!(second.key().as_str(), "b");
        assert!(first.sequence() < second.sequence());
        assert!(rx.try_recv().is_err());

        subscription.destroy().await;
        assert_eq!(store.stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_notifications_can_be_disabled() {
        let store = KeyValueStore::new(KVStoreConfig::new().with_notifications(false))
            .await
            .unwrap();
        let (_subscription, mut rx) = store.subscribe_channel(Vec::new(), 8);

        store.create_and_commit("a", "1").await;
        store.close().await;

        assert!(rx.recv().await.is_none());
        assert_eq!(store.stats().notifications_dispatched, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = KeyValueStore::new(KVStoreConfig::new().with_command_buffer(0)).await;
        assert!(matches!(result, Err(StoreError::InvalidConfig { .. })));
    }
}
