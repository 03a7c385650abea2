use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::definition::{ApproverSelector, StepConfig, WorkflowStep};
use crate::run::ExecutionContext;

use super::{ExecutionResult, StepExecutor};

/// A concrete user resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user id
    pub id: String,

    /// Display name for human-readable records
    pub display_name: String,

    /// Email address, when the provider knows one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserIdentity {
    /// Create an identity
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: None,
        }
    }

    /// Attach an email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Collaborator that resolves an approver selector to a concrete user.
///
/// Implemented by the surrounding application against its identity
/// provider; resolution failures are opaque to the engine.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a role or explicit user id to a user identity
    async fn resolve_approver(&self, selector: &ApproverSelector) -> anyhow::Result<UserIdentity>;
}

/// A recorded request for a human approval decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique id of this request; doubles as the run's resume key
    pub request_id: String,

    /// Run suspended on this request
    pub run_id: String,

    /// Approval step that created the request
    pub step_id: String,

    /// The resolved approver
    pub approver: UserIdentity,

    /// Time the request was recorded
    pub requested_at: DateTime<Utc>,
}

/// A decision applied to a suspended run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Whether the request was approved
    pub approved: bool,

    /// User id of the decider
    pub decided_by: String,

    /// Optional free-form comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalDecision {
    /// An approving decision
    pub fn approve(decided_by: impl Into<String>) -> Self {
        Self {
            approved: true,
            decided_by: decided_by.into(),
            comment: None,
        }
    }

    /// A rejecting decision
    pub fn reject(decided_by: impl Into<String>) -> Self {
        Self {
            approved: false,
            decided_by: decided_by.into(),
            comment: None,
        }
    }

    /// Attach a comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Pending approval requests, keyed by run id.
///
/// A run suspends on at most one approval at a time, so the run id is
/// a sufficient key. The ledger is queryable while the run is
/// suspended and cleared when the decision is applied or the run is
/// cancelled.
#[derive(Debug, Default)]
pub struct ApprovalLedger {
    pending: Mutex<HashMap<String, ApprovalRequest>>,
}

impl ApprovalLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request for its run
    pub async fn record(&self, request: ApprovalRequest) {
        let mut pending = self.pending.lock().await;
        pending.insert(request.run_id.clone(), request);
    }

    /// The pending request for a run, if any
    pub async fn get(&self, run_id: &str) -> Option<ApprovalRequest> {
        self.pending.lock().await.get(run_id).cloned()
    }

    /// Remove and return the pending request for a run
    pub async fn take(&self, run_id: &str) -> Option<ApprovalRequest> {
        self.pending.lock().await.remove(run_id)
    }
}

/// Executor for `approval` steps.
///
/// Resolves the approver, records the pending request, and suspends
/// the run. The decision itself arrives later through the engine's
/// `resume` call; this executor never blocks waiting for it.
pub struct ApprovalExecutor {
    identity: Arc<dyn IdentityProvider>,
    ledger: Arc<ApprovalLedger>,
}

impl fmt::Debug for ApprovalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalExecutor").finish()
    }
}

impl ApprovalExecutor {
    /// Create an executor backed by the given identity provider and ledger
    pub fn new(identity: Arc<dyn IdentityProvider>, ledger: Arc<ApprovalLedger>) -> Self {
        Self { identity, ledger }
    }
}

#[async_trait]
impl StepExecutor for ApprovalExecutor {
    #[instrument(skip(self, step, context), fields(step.id = %step.id, run.id = %context.run_id))]
    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &mut ExecutionContext,
        _attempt: u32,
    ) -> ExecutionResult {
        let approver_selector = match &step.config {
            StepConfig::Approval { approver } => approver,
            other => {
                return ExecutionResult::Fail {
                    reason: format!(
                        "step '{}' routed to approval executor with {} config",
                        step.id,
                        other.kind()
                    ),
                }
            }
        };

        let approver = match self.identity.resolve_approver(approver_selector).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!("Approver resolution failed for step {}: {}", step.id, err);
                return ExecutionResult::Fail {
                    reason: format!("could not resolve approver for step '{}': {}", step.id, err),
                };
            }
        };

        let request = ApprovalRequest {
            request_id: Uuid::new_v4().to_string(),
            run_id: context.run_id.clone(),
            step_id: step.id.clone(),
            approver,
            requested_at: Utc::now(),
        };
        let resume_key = request.request_id.clone();
        debug!("Recorded approval request {} for run {}", resume_key, context.run_id);
        self.ledger.record(request).await;

        ExecutionResult::Suspend { resume_key }
    }
}

/// Validate an approval step's config: the approver selector must name
/// a non-empty role or user id.
pub fn validate_config(step: &WorkflowStep) -> Result<(), String> {
    match &step.config {
        StepConfig::Approval { approver } => {
            if approver.as_str().trim().is_empty() {
                Err("approval step requires a non-empty approver role or id".to_string())
            } else {
                Ok(())
            }
        }
        other => Err(format!(
            "step '{}' declares kind {} but was validated as approval",
            step.id,
            other.kind()
        )),
    }
}
