//! # Agoni Core
//!
//! Core types for the Agoni in-memory key-value store.
//!
//! This crate holds the vocabulary shared by the store engine and its
//! consumers:
//!
//! - **Key / Value**: immutable identifiers and owned payloads
//! - **Operation**: a Create, Update or Delete together with its outcome
//! - **Filter**: predicates used to route committed operations to subscribers
//! - **Error Handling**: the error kinds an operation can fail with
//!
//! The store itself lives in `agoni-kvstore`; everything here is plain data
//! and can be used without a runtime.
//!
//! ```rust
//! use agoni_core::{Filter, Operation, OperationKind};
//! use std::collections::HashMap;
//!
//! let mut state = HashMap::new();
//! let op = Operation::create("a", "1").apply(&mut state, 1);
//!
//! assert!(op.is_committed());
//! assert!(Filter::kind(OperationKind::Create).matches(&op));
//! ```

pub mod error;
pub mod filter;
pub mod operation;
pub mod types;

pub use error::*;
pub use filter::{matches_all, Filter};
pub use operation::{Mutation, Operation, OperationKind, OperationStatus};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    enum Step {
        Create(u8, u8),
        Update(u8, u8),
        Delete(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4, any::<u8>()).prop_map(|(k, v)| Step::Create(k, v)),
            (0u8..4, any::<u8>()).prop_map(|(k, v)| Step::Update(k, v)),
            (0u8..4).prop_map(Step::Delete),
        ]
    }

    proptest! {
        #[test]
        fn prop_presence_follows_last_successful_mutation(steps in proptest::collection::vec(step(), 0..64)) {
            let mut state = HashMap::new();
            let mut expected: HashMap<String, String> = HashMap::new();
            let mut sequence = 0;

            for step in steps {
                sequence += 1;
                let op = match &step {
                    Step::Create(k, v) => Operation::create(format!("k{k}"), format!("{v}")),
                    Step::Update(k, v) => Operation::update(format!("k{k}"), format!("{v}")),
                    Step::Delete(k) => Operation::delete(format!("k{k}")),
                };
                let key = op.key().as_str().to_string();
                let before = expected.get(&key).cloned();
                let op = op.apply(&mut state, sequence);

                match step {
                    Step::Create(_, v) => {
                        prop_assert_eq!(op.is_committed(), before.is_none());
                        if op.is_committed() {
                            expected.insert(key, v.to_string());
                        }
                    }
                    Step::Update(_, v) => {
                        prop_assert_eq!(op.is_committed(), before.is_some());
                        if op.is_committed() {
                            prop_assert_eq!(op.old_value().map(|v| v.as_str().to_string()), before);
                            expected.insert(key, v.to_string());
                        }
                    }
                    Step::Delete(_) => {
                        prop_assert_eq!(op.is_committed(), before.is_some());
                        if op.is_committed() {
                            prop_assert_eq!(op.old_value().map(|v| v.as_str().to_string()), before);
                            expected.remove(&key);
                        }
                    }
                }
                prop_assert_eq!(op.is_failed(), op.error().is_some());
            }

            let actual: HashMap<String, String> = state
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v.into_inner()))
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
