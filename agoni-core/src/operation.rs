//! # Operations
//!
//! An [`Operation`] is a single requested mutation of the store together with
//! its eventual outcome. Operations are built in the `Ready` state, transition
//! exactly once to `Committed` or `Failed` when applied, and are immutable
//! afterwards.

use crate::{Key, OperationId, StoreError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The three kinds of mutation the store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "CREATE"),
            OperationKind::Update => write!(f, "UPDATE"),
            OperationKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Lifecycle state of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Zero value; never produced by the store's factories
    #[default]
    Uninitialized,
    /// Built and waiting to be committed
    Ready,
    /// Applied to the store
    Committed,
    /// Rejected; the store was not modified
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Committed | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Uninitialized => write!(f, "UNINITIALIZED"),
            OperationStatus::Ready => write!(f, "READY"),
            OperationStatus::Committed => write!(f, "COMMITTED"),
            OperationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// The mutation an operation carries.
///
/// `old_value` is never supplied by the caller; it is filled in when an
/// update or delete is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Create {
        key: Key,
        value: Value,
    },
    Update {
        key: Key,
        value: Value,
        old_value: Option<Value>,
    },
    Delete {
        key: Key,
        old_value: Option<Value>,
    },
}

impl Mutation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Mutation::Create { .. } => OperationKind::Create,
            Mutation::Update { .. } => OperationKind::Update,
            Mutation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            Mutation::Create { key, .. } => key,
            Mutation::Update { key, .. } => key,
            Mutation::Delete { key, .. } => key,
        }
    }
}

/// A single change to the store, pending or completed.
///
/// Operations are obtained from the store's factory methods and handed back
/// to it for commit. The applier consumes the operation, applies it to the
/// mapping and returns it in a terminal state.
///
/// # Examples
///
/// ```rust
/// use agoni_core::{Operation, OperationStatus, StoreError, Value};
/// use std::collections::HashMap;
///
/// let mut state = HashMap::new();
///
/// let created = Operation::create("a", "1").apply(&mut state, 1);
/// assert_eq!(created.status(), OperationStatus::Committed);
///
/// let updated = Operation::update("a", "2").apply(&mut state, 2);
/// assert_eq!(updated.old_value(), Some(&Value::from("1")));
///
/// let duplicate = Operation::create("a", "3").apply(&mut state, 3);
/// assert_eq!(duplicate.error(), Some(&StoreError::key_exists("a")));
/// assert_eq!(state.get("a"), Some(&Value::from("2")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    id: OperationId,
    mutation: Mutation,
    status: OperationStatus,
    error: Option<StoreError>,
    sequence: Option<u64>,
}

impl Operation {
    fn ready(mutation: Mutation) -> Self {
        Self {
            id: OperationId::new(),
            mutation,
            status: OperationStatus::Ready,
            error: None,
            sequence: None,
        }
    }

    /// Builds a `Ready` operation that inserts `key` with `value`.
    pub fn create(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self::ready(Mutation::Create {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Builds a `Ready` operation that replaces the value stored under `key`.
    pub fn update(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self::ready(Mutation::Update {
            key: key.into(),
            value: value.into(),
            old_value: None,
        })
    }

    /// Builds a `Ready` operation that removes `key`.
    pub fn delete(key: impl Into<Key>) -> Self {
        Self::ready(Mutation::Delete {
            key: key.into(),
            old_value: None,
        })
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.mutation.kind()
    }

    pub fn key(&self) -> &Key {
        self.mutation.key()
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Value written by a create or update; `None` for deletes.
    pub fn new_value(&self) -> Option<&Value> {
        match &self.mutation {
            Mutation::Create { value, .. } | Mutation::Update { value, .. } => Some(value),
            Mutation::Delete { .. } => None,
        }
    }

    /// Value replaced or removed by a committed update or delete.
    pub fn old_value(&self) -> Option<&Value> {
        match &self.mutation {
            Mutation::Create { .. } => None,
            Mutation::Update { old_value, .. } | Mutation::Delete { old_value, .. } => {
                old_value.as_ref()
            }
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Error the operation failed with. Present iff the status is `Failed`.
    pub fn error(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    /// Position in the store's commit order, starting at 1.
    ///
    /// Only committed operations have a sequence number.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn is_ready(&self) -> bool {
        self.status == OperationStatus::Ready
    }

    pub fn is_committed(&self) -> bool {
        self.status == OperationStatus::Committed
    }

    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    /// Applies the operation to `state`.
    ///
    /// Presence checks and the mutation happen in one step against the map
    /// passed in, so the caller must be its sole owner. On success the
    /// operation is stamped `Committed` with `sequence`; on rejection it is
    /// stamped `Failed` and `state` is left untouched. Operations that are not
    /// `Ready` are returned unchanged.
    ///
    /// Outcome fields carried in by a deserialized `Ready` operation are
    /// discarded before the operation is evaluated.
    pub fn apply(mut self, state: &mut HashMap<Key, Value>, sequence: u64) -> Self {
        if !self.is_ready() {
            return self;
        }
        self.clear_outcome();

        let outcome = match &mut self.mutation {
            Mutation::Create { key, value } => {
                if state.contains_key(&*key) {
                    Err(StoreError::key_exists(key.clone()))
                } else {
                    state.insert(key.clone(), value.clone());
                    Ok(())
                }
            }
            Mutation::Update {
                key,
                value,
                old_value,
            } => match state.get_mut(&*key) {
                Some(current) => {
                    *old_value = Some(std::mem::replace(current, value.clone()));
                    Ok(())
                }
                None => Err(StoreError::key_not_found(key.clone())),
            },
            Mutation::Delete { key, old_value } => match state.remove(&*key) {
                Some(removed) => {
                    *old_value = Some(removed);
                    Ok(())
                }
                None => Err(StoreError::key_not_found(key.clone())),
            },
        };

        match outcome {
            Ok(()) => {
                self.status = OperationStatus::Committed;
                self.sequence = Some(sequence);
                self
            }
            Err(error) => self.reject(error),
        }
    }

    /// Marks a `Ready` operation as `Failed` with `error`.
    ///
    /// Terminal operations are returned unchanged.
    pub fn reject(mut self, error: StoreError) -> Self {
        if self.is_ready() {
            self.clear_outcome();
            self.status = OperationStatus::Failed;
            self.error = Some(error);
        }
        self
    }

    fn clear_outcome(&mut self) {
        self.error = None;
        self.sequence = None;
        match &mut self.mutation {
            Mutation::Create { .. } => {}
            Mutation::Update { old_value, .. } | Mutation::Delete { old_value, .. } => {
                *old_value = None;
            }
        }
    }

    /// Converts a terminal operation into a `Result`.
    ///
    /// Committed operations are returned as `Ok`; failed ones yield their
    /// error. Operations that have not been applied yield
    /// [`StoreError::InvalidOperation`].
    pub fn into_result(self) -> crate::Result<Operation> {
        match self.status {
            OperationStatus::Committed => Ok(self),
            OperationStatus::Failed => Err(self
                .error
                .unwrap_or(StoreError::InvalidOperation {
                    status: OperationStatus::Failed,
                })),
            status => Err(StoreError::InvalidOperation { status }),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.kind(), self.key(), self.status)
    }
}
