//! Run-side state: the per-run execution context threaded through
//! steps, the persisted run projection, and per-step records.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run created, first step not yet executed
    Pending,

    /// Orchestrator actively advancing the step index
    Running,

    /// Suspended on an approval step, waiting for a decision
    WaitingOnApproval,

    /// All steps finished with no pending suspension
    Completed,

    /// Terminated by a step failure, validation error, or rejection
    Failed,

    /// Terminated by an explicit external cancel call
    Cancelled,
}

impl RunStatus {
    /// Whether this status is terminal; terminal statuses are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Parse a status from its persisted string form
    pub fn from_string(s: &str) -> EngineResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting_on_approval" => Ok(Self::WaitingOnApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(EngineError::Storage(format!("unknown run status: {}", s))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingOnApproval => "waiting_on_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// The mutable variable bag threaded through one run's steps.
///
/// Created when a trigger fires and archived when the run reaches a
/// terminal state. Two runs never share a context, so concurrent runs
/// of the same definition cannot interfere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Id of the definition this run executes
    pub workflow_id: String,

    /// Unique id of this run
    pub run_id: String,

    /// Variables accumulated by steps, keyed by name
    pub variables: HashMap<String, serde_json::Value>,

    /// Index of the next step to execute; only ever advances
    pub current_step_index: usize,
}

impl ExecutionContext {
    /// Create a fresh context for a new run of the given definition
    pub fn new(workflow_id: &str, variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            run_id: Uuid::new_v4().to_string(),
            variables,
            current_step_index: 0,
        }
    }

    /// Merge key/values into the variable bag, overwriting existing keys
    pub fn merge_variables(&mut self, updates: HashMap<String, serde_json::Value>) {
        for (key, value) in updates {
            self.variables.insert(key, value);
        }
    }

    /// Set a single variable
    pub fn set_variable<T: Into<serde_json::Value>>(&mut self, key: &str, value: T) {
        self.variables.insert(key.to_string(), value.into());
    }

    /// Advance past the current step. The index is monotonic: there is
    /// no way to move it backwards within a run.
    pub fn advance(&mut self) {
        self.current_step_index += 1;
    }
}

/// Persisted projection of a run: its context position plus status and
/// timestamps. Written by the orchestrator at every state transition
/// and queryable at any time via `get_run_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique id of this run
    pub run_id: String,

    /// Id of the definition this run executes
    pub workflow_id: String,

    /// Current status
    pub status: RunStatus,

    /// Time the run was created
    pub started_at: DateTime<Utc>,

    /// Time the run reached a terminal state, if it has
    pub completed_at: Option<DateTime<Utc>>,

    /// Human-readable description of the last failure, if any
    pub last_error: Option<String>,
}

impl WorkflowRun {
    /// Create a new run record in `Pending` for the given context
    pub fn new(context: &ExecutionContext) -> Self {
        Self {
            run_id: context.run_id.clone(),
            workflow_id: context.workflow_id.clone(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            last_error: None,
        }
    }
}

/// Outcome of one step execution attempt, as recorded in the run store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step finished; replay after a crash skips completed steps
    Completed,
    /// Step failed terminally
    Failed,
    /// Step suspended the run pending an external decision
    Waiting,
}

/// Durable record of one step's execution within a run.
///
/// Doubles as the de-duplication record for crash recovery: a step
/// recorded `Completed` for a `(run_id, step_id)` pair is not executed
/// again when the run is replayed from its persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Run this record belongs to
    pub run_id: String,

    /// Step id from the definition
    pub step_id: String,

    /// Outcome of the step
    pub status: StepStatus,

    /// Attempt count that produced this outcome (1 = first attempt)
    pub attempt: u32,

    /// Output snapshot or failure detail, if any
    pub detail: Option<String>,

    /// Time the record was written
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// Create a record for the given step outcome
    pub fn new(run_id: &str, step_id: &str, status: StepStatus, attempt: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            step_id: step_id.to_string(),
            status,
            attempt,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach output or failure detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
