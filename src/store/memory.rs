use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::run::{ExecutionContext, RunStatus, StepRecord, WorkflowRun};

use super::RunStore;

#[derive(Debug)]
struct RunEntry {
    run: WorkflowRun,
    context: ExecutionContext,
    steps: Vec<StepRecord>,
}

/// In-memory run store.
///
/// Backs tests and single-process embeddings. A single mutex over the
/// run table makes `transition` a true compare-and-set; the critical
/// sections are map operations only, never held across I/O.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl InMemoryRunStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(&self, run: WorkflowRun, context: ExecutionContext) -> EngineResult<()> {
        let mut runs = self.runs.lock().await;
        debug!("Persisting new run: {}", run.run_id);
        runs.insert(
            run.run_id.clone(),
            RunEntry {
                run,
                context,
                steps: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> EngineResult<WorkflowRun> {
        let runs = self.runs.lock().await;
        runs.get(run_id)
            .map(|e| e.run.clone())
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    async fn load_context(&self, run_id: &str) -> EngineResult<ExecutionContext> {
        let runs = self.runs.lock().await;
        runs.get(run_id)
            .map(|e| e.context.clone())
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    async fn save_context(&self, context: &ExecutionContext) -> EngineResult<()> {
        let mut runs = self.runs.lock().await;
        let entry = runs
            .get_mut(&context.run_id)
            .ok_or_else(|| EngineError::RunNotFound(context.run_id.clone()))?;
        entry.context = context.clone();
        Ok(())
    }

    async fn transition(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
        last_error: Option<String>,
    ) -> EngineResult<WorkflowRun> {
        let mut runs = self.runs.lock().await;
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let current = entry.run.status;
        if current.is_terminal() {
            return Err(EngineError::AlreadyTerminal(run_id.to_string()));
        }
        if !from.contains(&current) {
            let expected = from
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(EngineError::InvalidRunState {
                run_id: run_id.to_string(),
                expected,
                actual: current,
            });
        }

        debug!("Run {} transition: {} -> {}", run_id, current, to);
        entry.run.status = to;
        if to.is_terminal() {
            entry.run.completed_at = Some(Utc::now());
        }
        if last_error.is_some() {
            entry.run.last_error = last_error;
        }
        Ok(entry.run.clone())
    }

    async fn list_runs(&self, status: Option<RunStatus>) -> EngineResult<Vec<WorkflowRun>> {
        let runs = self.runs.lock().await;
        Ok(runs
            .values()
            .filter(|e| status.map_or(true, |s| e.run.status == s))
            .map(|e| e.run.clone())
            .collect())
    }

    async fn record_step(&self, record: StepRecord) -> EngineResult<()> {
        let mut runs = self.runs.lock().await;
        let entry = runs
            .get_mut(&record.run_id)
            .ok_or_else(|| EngineError::RunNotFound(record.run_id.clone()))?;
        entry.steps.push(record);
        Ok(())
    }

    async fn step_records(&self, run_id: &str) -> EngineResult<Vec<StepRecord>> {
        let runs = self.runs.lock().await;
        runs.get(run_id)
            .map(|e| e.steps.clone())
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }
}
