//! Durable run storage.
//!
//! The run store is the source of truth for run state: every status
//! transition the orchestrator makes goes through it, and a suspended
//! run lives entirely here until resumed. The access contract is part
//! of this crate; the production implementation is supplied by the
//! surrounding application (a hosted relational store in practice).

/// In-memory implementation for tests and single-process embedding
pub mod memory;

pub use memory::InMemoryRunStore;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::run::{ExecutionContext, RunStatus, StepRecord, WorkflowRun};

/// Storage contract for workflow runs.
///
/// `transition` is the concurrency primitive of the whole engine: it
/// compares the run's current status against the allowed set and swaps
/// in the new status atomically. Two orchestrator workers racing to
/// claim the same suspended run therefore cannot both win; the loser
/// observes `InvalidRunState`. Terminal statuses are immutable: any
/// transition attempt on a terminal run fails with `AlreadyTerminal`.
///
/// The persisted run shape must stay additive-compatible (new optional
/// fields only) so in-flight runs survive a deployment.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run and its execution context
    async fn insert_run(&self, run: WorkflowRun, context: ExecutionContext) -> EngineResult<()>;

    /// Fetch the persisted run projection
    async fn get_run(&self, run_id: &str) -> EngineResult<WorkflowRun>;

    /// Load the run's execution context as last saved
    async fn load_context(&self, run_id: &str) -> EngineResult<ExecutionContext>;

    /// Persist the run's execution context (variables + step index)
    async fn save_context(&self, context: &ExecutionContext) -> EngineResult<()>;

    /// Atomically transition the run's status.
    ///
    /// Succeeds only when the current status is one of `from`; returns
    /// the updated run. Sets `completed_at` when `to` is terminal and
    /// records `last_error` when given.
    async fn transition(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
        last_error: Option<String>,
    ) -> EngineResult<WorkflowRun>;

    /// List runs, optionally filtered by status
    async fn list_runs(&self, status: Option<RunStatus>) -> EngineResult<Vec<WorkflowRun>>;

    /// Append a per-step execution record
    async fn record_step(&self, record: StepRecord) -> EngineResult<()>;

    /// The run's step records in the order they were written
    async fn step_records(&self, run_id: &str) -> EngineResult<Vec<StepRecord>>;
}
