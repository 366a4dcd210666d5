//! # Agoni KVStore
//!
//! In-memory key-value store that serializes every mutation through a single
//! applier task and broadcasts committed changes to filterable subscriptions.
//!
//! ## Features
//!
//! - **Linearizable writes**: one task owns the mapping and applies requests
//!   in arrival order
//! - **First-class operations**: build a Create, Update or Delete, commit it,
//!   and get it back stamped with its outcome and captured old value
//! - **Change subscriptions**: per-subscription ordered, best-effort delivery
//!   that never blocks the writer
//! - **Leak-free teardown**: destroying a subscription stops its dispatcher
//!   even if nobody reads the channel
//!
//! ```rust,no_run
//! use agoni_core::{Filter, OperationKind};
//! use agoni_kvstore::{KVStoreConfig, KeyValueStore};
//!
//! #[tokio::main]
//! async fn main() -> agoni_core::Result<()> {
//!     let store = KeyValueStore::new(KVStoreConfig::default()).await?;
//!     let (subscription, mut deletes) =
//!         store.subscribe_channel(vec![Filter::kind(OperationKind::Delete)], 16);
//!
//!     store.create_and_commit("a", "1").await.into_result()?;
//!     let deleted = store.delete_and_commit("a").await.into_result()?;
//!     assert_eq!(deleted.old_value().map(|v| v.as_str()), Some("1"));
//!
//!     let notified = deletes.recv().await.expect("delete notification");
//!     assert_eq!(notified.key().as_str(), "a");
//!
//!     subscription.destroy().await;
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod stats;
pub mod store;
pub mod subscription;

pub use config::KVStoreConfig;
pub use stats::StoreStats;
pub use store::KeyValueStore;
pub use subscription::{Subscription, SubscriptionId};

/// Re-export commonly used types
pub use agoni_core::{Filter, Key, Operation, OperationKind, OperationStatus, StoreError, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_runs_on_a_test_runtime() {
        tokio_test::block_on(async {
            let store = KeyValueStore::new(KVStoreConfig::default()).await.unwrap();

            let result = store.create_and_commit("key1", "value1").await;
            assert!(result.is_committed());

            let value = store.get("key1").await.unwrap();
            assert_eq!(value.unwrap(), "value1");

            store.close().await;
        });
    }
}
