use agoni_core::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Configuration for the [`KeyValueStore`](crate::KeyValueStore)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KVStoreConfig {
    /// Capacity of the hand-off channel between submitters and the applier.
    /// Submitters wait once it is full.
    pub command_buffer: usize,
    /// Number of notifications a subscription may have queued before further
    /// ones are dropped
    pub subscription_buffer: usize,
    /// Fan committed operations out to subscriptions
    pub enable_notifications: bool,
}

impl Default for KVStoreConfig {
    fn default() -> Self {
        Self {
            command_buffer: 1,
            subscription_buffer: 1024,
            enable_notifications: true,
        }
    }
}

impl KVStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity;
        self
    }

    pub fn with_subscription_buffer(mut self, capacity: usize) -> Self {
        self.subscription_buffer = capacity;
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.enable_notifications = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_buffer == 0 {
            return Err(StoreError::invalid_config(
                "command_buffer must be greater than zero",
            ));
        }
        if self.subscription_buffer == 0 {
            return Err(StoreError::invalid_config(
                "subscription_buffer must be greater than zero",
            ));
        }
        Ok(())
    }
}
