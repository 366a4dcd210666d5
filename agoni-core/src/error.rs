//! # Error Types
//!
//! Errors produced while applying operations to the store.

use crate::{Key, OperationStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds an operation can fail with.
///
/// Errors are attached to the operation that caused them and never affect
/// other operations or the applier itself.
///
/// # Examples
///
/// ```rust
/// use agoni_core::StoreError;
///
/// let error = StoreError::key_exists("a");
/// assert!(error.is_conflict());
/// assert_eq!(error.to_string(), "Key exists: a");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    /// A create targeted a key that is already present
    #[error("Key exists: {key}")]
    KeyExists { key: Key },

    /// An update or delete targeted a key that is absent
    #[error("Key not found: {key}")]
    KeyNotFound { key: Key },

    /// The store was closed before the request reached the applier
    #[error("Store is closed")]
    EngineClosed,

    /// The operation was not in a committable state
    #[error("Operation cannot be committed in state {status}")]
    InvalidOperation { status: OperationStatus },

    /// The store configuration was rejected
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Result alias used throughout Agoni.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn key_exists(key: impl Into<Key>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    pub fn key_not_found(key: impl Into<Key>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` when the error comes from the current contents of the
    /// store rather than from its lifecycle or from misuse.
    ///
    /// Conflicts are the only errors a caller can expect to resolve by
    /// resubmitting a different operation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::KeyExists { .. } | Self::KeyNotFound { .. })
    }
}
