//! Sequential reference model.
//!
//! Replays committed operations in sequence order against a plain map and
//! checks that the result is consistent with what the store reports.

use anyhow::{bail, ensure, Result};
use std::collections::HashMap;

use agoni_core::{Key, Mutation, Operation, Value};

#[derive(Debug, Default, Clone)]
pub struct ReferenceModel {
    state: HashMap<Key, Value>,
    last_sequence: u64,
}

impl ReferenceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays `operations` in commit order.
    ///
    /// Failed operations are skipped. Committed ones must carry consecutive
    /// sequence numbers, and every captured old value must equal what the
    /// model held at that point.
    pub fn replay(operations: &[Operation]) -> Result<Self> {
        let mut committed: Vec<&Operation> =
            operations.iter().filter(|op| op.is_committed()).collect();
        committed.sort_by_key(|op| op.sequence());

        let mut model = Self::new();
        for operation in committed {
            model.apply(operation)?;
        }
        Ok(model)
    }

    pub fn apply(&mut self, operation: &Operation) -> Result<()> {
        let Some(sequence) = operation.sequence() else {
            bail!("operation {} has no sequence number", operation);
        };
        ensure!(
            sequence == self.last_sequence + 1,
            "expected sequence {}, got {} for {}",
            self.last_sequence + 1,
            sequence,
            operation
        );

        match operation.mutation() {
            Mutation::Create { key, value } => {
                ensure!(
                    !self.state.contains_key(key),
                    "create of {} committed while the key was present",
                    key
                );
                self.state.insert(key.clone(), value.clone());
            }
            Mutation::Update {
                key,
                value,
                old_value,
            } => {
                let previous = self.state.insert(key.clone(), value.clone());
                ensure!(
                    previous.is_some() && previous == *old_value,
                    "update of {} captured {:?}, model held {:?}",
                    key,
                    old_value,
                    previous
                );
            }
            Mutation::Delete { key, old_value } => {
                let previous = self.state.remove(key);
                ensure!(
                    previous.is_some() && previous == *old_value,
                    "delete of {} captured {:?}, model held {:?}",
                    key,
                    old_value,
                    previous
                );
            }
        }

        self.last_sequence = sequence;
        Ok(())
    }

    pub fn state(&self) -> &HashMap<Key, Value> {
        &self.state
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(ops: Vec<Operation>) -> Vec<Operation> {
        let mut state = HashMap::new();
        let mut sequence = 1;
        ops.into_iter()
            .map(|op| {
                let op = op.apply(&mut state, sequence);
                if op.is_committed() {
                    sequence += 1;
                }
                op
            })
            .collect()
    }

    #[test]
    fn test_replay_accepts_consistent_history() {
        let ops = committed(vec![
            Operation::create("a", "1"),
            Operation::create("a", "dup"),
            Operation::update("a", "2"),
            Operation::create("b", "1"),
            Operation::delete("b"),
        ]);

        let model = ReferenceModel::replay(&ops).unwrap();
        assert_eq!(model.last_sequence(), 4);
        assert_eq!(model.state().get("a"), Some(&Value::from("2")));
        assert!(model.state().get("b").is_none());
    }

    #[test]
    fn test_replay_rejects_gaps() {
        let mut ops = committed(vec![
            Operation::create("a", "1"),
            Operation::create("b", "1"),
        ]);
        ops.remove(0);

        assert!(ReferenceModel::replay(&ops).is_err());
    }
}
