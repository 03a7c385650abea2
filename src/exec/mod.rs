//! Step execution: the polymorphic executor capability, its result
//! variant, the retry policy shared by executors, and the three
//! standard executors (`approval`, `notification`, `action`).

/// Action steps: handler table and executor
pub mod action;
/// Approval steps: identity resolution, ledger, and executor
pub mod approval;
/// Notification steps: template rendering, transport, and executor
pub mod notification;

pub use action::{ActionExecutor, ActionHandler, ActionHandlers};
pub use approval::{
    ApprovalDecision, ApprovalExecutor, ApprovalLedger, ApprovalRequest, IdentityProvider,
    UserIdentity,
};
pub use notification::{NotificationExecutor, NotificationTransport};

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::definition::{StepKind, WorkflowStep};
use crate::error::EngineResult;
use crate::registry::StepRegistry;
use crate::run::ExecutionContext;

/// Outcome of one step execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Step finished; advance to the next step
    Continue,

    /// Halt the run until an external event matching `resume_key` arrives
    Suspend {
        /// Key the resuming event must match
        resume_key: String,
    },

    /// Transient failure; re-execute the same step after the delay
    Retry {
        /// Delay before the next attempt, in milliseconds
        after_ms: u64,
    },

    /// Terminal failure; the run transitions to `Failed`
    Fail {
        /// Human-readable failure reason, persisted as `last_error`
        reason: String,
    },
}

/// Capability implemented once per step type.
///
/// Executors are stateless and shared across runs; all per-run state
/// lives in the `ExecutionContext`. `attempt` starts at 1 and counts
/// retries of the same step within the same run, letting an executor
/// decide when a transient fault has exhausted its retry budget.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute the step against the run's context
    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &mut ExecutionContext,
        attempt: u32,
    ) -> ExecutionResult;
}

/// Retry policy for transient step failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts before a transient fault turns terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial interval between retries in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Maximum interval between retries in milliseconds
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Multiplier for backoff
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,

    /// Random jitter fraction added to each delay (0.0 disables)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    10000
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt, with exponential backoff capped
    /// at `max_interval_ms` plus random jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let base = self.initial_interval_ms as f64
            * self.backoff_coefficient.powi(attempt as i32 - 1);
        let capped = base.min(self.max_interval_ms as f64);

        if self.jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
            (capped * factor) as u64
        } else {
            capped as u64
        }
    }
}

/// Build a registry with the three standard step types wired to the
/// given collaborators.
pub fn standard_registry(
    identity: Arc<dyn IdentityProvider>,
    transport: Arc<dyn NotificationTransport>,
    handlers: Arc<ActionHandlers>,
    ledger: Arc<ApprovalLedger>,
    retry: RetryConfig,
) -> EngineResult<StepRegistry> {
    let mut registry = StepRegistry::new();
    registry.register_step_type(
        StepKind::Approval,
        Box::new(approval::validate_config),
        Arc::new(ApprovalExecutor::new(identity, ledger)),
    )?;
    registry.register_step_type(
        StepKind::Notification,
        Box::new(notification::validate_config),
        Arc::new(NotificationExecutor::new(transport, retry.clone())),
    )?;
    registry.register_step_type(
        StepKind::Action,
        Box::new(action::validate_config),
        Arc::new(ActionExecutor::new(handlers, retry)),
    )?;
    Ok(registry)
}
