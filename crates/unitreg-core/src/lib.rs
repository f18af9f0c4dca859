//! unitreg core — batch regression orchestration for design-unit workareas.
//!
//! The pipeline: a work-item registry feeds the scheduler, which dispatches
//! the external analysis command across units with bounded concurrency.
//! Each job runs under a deadline with a retry budget, its output is
//! interpreted by a per-category classifier, and every terminal outcome is
//! checkpointed so an interrupted run can resume without redoing work. The
//! aggregator reduces the results into a [`summary::RunSummary`] consumed
//! by the external dashboard renderer.

pub mod checkpoint;
pub mod classify;
pub mod error;
pub mod executor;
pub mod obs;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod status;
pub mod summary;
pub mod telemetry;

pub use checkpoint::{
    config_fingerprint, CheckpointRecord, CheckpointStore, JournalHeader, JournalStore,
    MemoryStore,
};
pub use classify::{category, category_names, Category, Classification, Classifier};
pub use error::{CheckpointError, RegistryError, Result, RunError};
pub use executor::{ExecSettings, JobResult};
pub use registry::{RegistryFormat, WorkItem};
pub use scheduler::{resolve_concurrency, Concurrency, RunConfig, RunEvent, MAX_AUTO_JOBS};
pub use status::{AcceptPolicy, Status};
pub use summary::{summarize, ItemOutcome, Overall, RunSummary};
pub use telemetry::init_tracing;

/// unitreg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
