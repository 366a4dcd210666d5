//! # Subscription Filters
//!
//! Predicates deciding whether a committed operation is delivered to a
//! subscription. A subscription holds an ordered list of filters and
//! receives an operation only if every filter matches.

use crate::{Key, Operation, OperationKind};
use serde::{Deserialize, Serialize};

/// A stateless predicate over an [`Operation`].
///
/// New kinds of filter are added as new variants.
///
/// # Examples
///
/// ```rust
/// use agoni_core::{Filter, Operation, OperationKind};
///
/// let op = Operation::delete("session:1");
///
/// assert!(Filter::ByOperationKind(OperationKind::Delete).matches(&op));
/// assert!(Filter::exact_key("session:1").matches(&op));
/// assert!(!Filter::exact_key("session:2").matches(&op));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// Matches operations of the given kind
    ByOperationKind(OperationKind),
    /// Matches operations on exactly this key
    ByExactKey(Key),
}

impl Filter {
    pub fn kind(kind: OperationKind) -> Self {
        Filter::ByOperationKind(kind)
    }

    pub fn exact_key(key: impl Into<Key>) -> Self {
        Filter::ByExactKey(key.into())
    }

    /// Check if an operation matches this filter
    pub fn matches(&self, operation: &Operation) -> bool {
        match self {
            Filter::ByOperationKind(kind) => operation.kind() == *kind,
            Filter::ByExactKey(key) => operation.key() == key,
        }
    }
}

/// Evaluates the conjunction of `filters` against `operation`.
///
/// An empty filter list matches every operation.
pub fn matches_all(filters: &[Filter], operation: &Operation) -> bool {
    filters.iter().all(|filter| filter.matches(operation))
}
