use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use agoni_core::{Operation, OperationKind};
use agoni_kvstore::KeyValueStore;

use crate::model::ReferenceModel;

/// Mixed create/update/delete traffic from several concurrent clients
#[derive(Debug, Clone, Serialize)]
pub struct Workload {
    pub name: String,
    pub clients: usize,
    pub operations_per_client: usize,
    /// Number of distinct keys the clients contend on
    pub key_space: usize,
    pub seed: u64,
}

impl Workload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clients: 8,
            operations_per_client: 100,
            key_space: 16,
            seed: 42,
        }
    }

    pub fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_operations_per_client(mut self, operations: usize) -> Self {
        self.operations_per_client = operations;
        self
    }

    pub fn with_key_space(mut self, keys: usize) -> Self {
        self.key_space = keys;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn total_operations(&self) -> usize {
        self.clients * self.operations_per_client
    }

    /// Generates the operations a single client submits, in order
    pub fn client_operations(&self, client: usize) -> Vec<Operation> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(client as u64));
        (0..self.operations_per_client)
            .map(|i| {
                let key = format!("key_{}", rng.gen_range(0..self.key_space.max(1)));
                let value = format!("client_{}_op_{}", client, i);
                match rng.gen_range(0..3) {
                    0 => Operation::create(key, value),
                    1 => Operation::update(key, value),
                    _ => Operation::delete(key),
                }
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct WorkloadReport {
    pub workload: Workload,
    /// Terminal operations, in no particular order
    pub operations: Vec<Operation>,
    pub duration: Duration,
}

impl WorkloadReport {
    pub fn committed(&self) -> usize {
        self.operations.iter().filter(|op| op.is_committed()).count()
    }

    pub fn failed(&self) -> usize {
        self.operations.iter().filter(|op| op.is_failed()).count()
    }

    pub fn committed_of_kind(&self, kind: OperationKind) -> Vec<&Operation> {
        let mut committed: Vec<&Operation> = self
            .operations
            .iter()
            .filter(|op| op.is_committed() && op.kind() == kind)
            .collect();
        committed.sort_by_key(|op| op.sequence());
        committed
    }

    pub fn throughput_ops_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.operations.len() as f64 / secs
        }
    }
}

/// Runs `workload` against `store` with one task per client.
pub async fn run_workload(store: Arc<KeyValueStore>, workload: Workload) -> Result<WorkloadReport> {
    info!(
        "Running workload {}: {} clients x {} operations over {} keys",
        workload.name, workload.clients, workload.operations_per_client, workload.key_space
    );

    let start = Instant::now();
    let clients = (0..workload.clients).map(|client| {
        let store = store.clone();
        let operations = workload.client_operations(client);
        tokio::spawn(async move {
            let mut completed = Vec::with_capacity(operations.len());
            for operation in operations {
                completed.push(store.commit(operation).await);
            }
            completed
        })
    });

    let mut operations = Vec::with_capacity(workload.total_operations());
    for result in futures_util::future::join_all(clients).await {
        operations.extend(result.context("workload client panicked")?);
    }

    let report = WorkloadReport {
        workload,
        operations,
        duration: start.elapsed(),
    };

    info!(
        "Workload {} finished: {} committed, {} failed, {:.0} ops/s",
        report.workload.name,
        report.committed(),
        report.failed(),
        report.throughput_ops_per_sec()
    );
    Ok(report)
}

/// Checks the store's final contents against a sequential replay of the
/// committed operations in `report`.
pub async fn verify_against_model(store: &KeyValueStore, report: &WorkloadReport) -> Result<()> {
    for operation in &report.operations {
        ensure!(
            operation.status().is_terminal(),
            "operation {} did not reach a terminal state",
            operation
        );
        ensure!(
            operation.is_failed() == operation.error().is_some(),
            "operation {} has an inconsistent error field",
            operation
        );
    }

    let model = ReferenceModel::replay(&report.operations)?;
    let snapshot = store.snapshot().await?;
    ensure!(
        &snapshot == model.state(),
        "store contents diverge from the sequential replay"
    );
    Ok(())
}
