pub mod model;
pub mod scenarios;

pub use model::ReferenceModel;
pub use scenarios::{run_workload, verify_against_model, Workload, WorkloadReport};

/// Installs a WARN-level fmt subscriber; safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
