//! The orchestrator: resolves definitions on trigger events, drives
//! each run's steps through the registered executors in order, and
//! persists every state transition to the run store.
//!
//! Scheduling model: any number of runs advance concurrently and
//! independently; within one run, steps execute strictly sequentially
//! because each step may depend on variables written by the previous
//! one. A suspended run holds no task, thread, or connection: its
//! state lives entirely in the run store until `resume` is called.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineSettings;
use crate::definition::{
    ApproverSelector, DefinitionStore, TriggerEvent, WorkflowDefinition,
};
use crate::error::{EngineError, EngineResult};
use crate::exec::{
    standard_registry, ActionHandlers, ApprovalDecision, ApprovalLedger, ApprovalRequest,
    ExecutionResult, IdentityProvider, NotificationTransport, UserIdentity,
};
use crate::registry::StepRegistry;
use crate::run::{ExecutionContext, RunStatus, StepRecord, StepStatus, WorkflowRun};
use crate::store::{InMemoryRunStore, RunStore};

/// The workflow engine.
///
/// Cheap to clone; clones share the definition store, registry, run
/// store, and approval ledger. Construct via [`Engine::builder`].
#[derive(Clone)]
pub struct Engine {
    definitions: Arc<DefinitionStore>,
    registry: Arc<StepRegistry>,
    run_store: Arc<dyn RunStore>,
    approvals: Arc<ApprovalLedger>,
    identity: Arc<dyn IdentityProvider>,
    settings: EngineSettings,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Engine {
    /// Start building an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Validate and register a workflow definition.
    ///
    /// All-or-nothing: on any validation failure nothing is stored and
    /// the error aggregates every problem found.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> EngineResult<()> {
        self.definitions.register(definition).await
    }

    /// All registered workflow definitions
    pub async fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.definitions.list().await
    }

    /// Fire a trigger event: create one `Pending` run per matching
    /// definition, persist each, and begin executing them.
    ///
    /// Returns the created run ids immediately; execution proceeds on
    /// spawned tasks and this call never blocks until completion. An
    /// event matching no definition creates no runs.
    #[instrument(skip(self, initial_variables), fields(event = %event_name))]
    pub async fn trigger(
        &self,
        event_name: &str,
        initial_variables: HashMap<String, serde_json::Value>,
    ) -> EngineResult<Vec<String>> {
        let matches = self.definitions.find_by_trigger(event_name).await;
        if matches.is_empty() {
            debug!("No definitions registered for trigger: {}", event_name);
            return Ok(Vec::new());
        }

        let mut run_ids = Vec::with_capacity(matches.len());
        for definition in matches {
            let context = ExecutionContext::new(&definition.id, initial_variables.clone());
            let run = WorkflowRun::new(&context);
            let run_id = run.run_id.clone();
            self.run_store.insert_run(run, context).await?;
            info!(
                "Created run {} of workflow '{}' for event '{}'",
                run_id, definition.id, event_name
            );

            let engine = self.clone();
            let spawned_id = run_id.clone();
            tokio::spawn(async move {
                engine.advance(&spawned_id).await;
            });
            run_ids.push(run_id);
        }
        Ok(run_ids)
    }

    /// Fire a trigger event carrying its initial variables as payload.
    ///
    /// Convenience over [`Engine::trigger`]: a JSON-object payload
    /// becomes the runs' initial variables; any other payload lands
    /// under the `"payload"` key.
    pub async fn trigger_event(&self, event: TriggerEvent) -> EngineResult<Vec<String>> {
        let variables = match event.payload {
            Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
            Some(other) => {
                let mut variables = HashMap::new();
                variables.insert("payload".to_string(), other);
                variables
            }
            None => HashMap::new(),
        };
        self.trigger(&event.name, variables).await
    }

    /// Apply an approval decision to a suspended run.
    ///
    /// Valid only while the run is `WaitingOnApproval`; the transition
    /// back to `Running` is an atomic claim, so of two concurrent
    /// `resume` calls exactly one succeeds and the other observes
    /// `InvalidRunState`. Resuming a terminal run fails with
    /// `AlreadyTerminal` and never mutates its status.
    #[instrument(skip(self, decision), fields(run.id = %run_id, approved = decision.approved))]
    pub async fn resume(&self, run_id: &str, decision: ApprovalDecision) -> EngineResult<()> {
        self.run_store
            .transition(run_id, &[RunStatus::WaitingOnApproval], RunStatus::Running, None)
            .await?;

        if self.approvals.take(run_id).await.is_none() {
            // Ledger entry can be gone after a process restart; the
            // persisted run state alone is authoritative.
            debug!("No in-memory approval request for run {}", run_id);
        }

        let mut context = self.run_store.load_context(run_id).await?;
        let definition = match self.definitions.get(&context.workflow_id).await {
            Ok(definition) => definition,
            Err(err) => {
                self.fail_run(run_id, err.to_string()).await?;
                return Ok(());
            }
        };
        let step_id = definition
            .steps
            .get(context.current_step_index)
            .map(|s| s.id.clone())
            .unwrap_or_default();

        let decider = self.resolve_decider(&decision.decided_by).await;
        let decided_at = Utc::now();

        if decision.approved {
            info!(
                "Run {} approved at step '{}' by {}",
                run_id, step_id, decider.id
            );
            context.set_variable(&format!("{}.approved_by", step_id), decider.id.clone());
            context.set_variable(&format!("{}.approved_at", step_id), decided_at.to_rfc3339());
            context.advance();
            self.run_store.save_context(&context).await?;
            let mut record = StepRecord::new(run_id, &step_id, StepStatus::Completed, 1)
                .with_detail(format!(
                    "approved by {} ({})",
                    decider.display_name, decider.id
                ));
            if let Some(comment) = &decision.comment {
                record.detail = record.detail.map(|d| format!("{}: {}", d, comment));
            }
            self.run_store.record_step(record).await?;
            self.advance_inner(run_id).await
        } else {
            let mut reason = format!(
                "ApprovalRejected: rejected by {} ({}) at {}",
                decider.display_name,
                decider.id,
                decided_at.to_rfc3339()
            );
            if let Some(comment) = &decision.comment {
                reason = format!("{}: {}", reason, comment);
            }
            info!("Run {} rejected at step '{}' by {}", run_id, step_id, decider.id);
            self.run_store
                .record_step(
                    StepRecord::new(run_id, &step_id, StepStatus::Failed, 1)
                        .with_detail(reason.clone()),
                )
                .await?;
            self.fail_run(run_id, reason).await?;
            Ok(())
        }
    }

    /// Cancel a run.
    ///
    /// Valid from `Pending`, `Running`, or `WaitingOnApproval`; fails
    /// with `AlreadyTerminal` otherwise. Cancellation is cooperative:
    /// an in-flight step finishes, and the orchestrator stops before
    /// the next step begins.
    #[instrument(skip(self), fields(run.id = %run_id))]
    pub async fn cancel(&self, run_id: &str) -> EngineResult<()> {
        self.run_store
            .transition(
                run_id,
                &[
                    RunStatus::Pending,
                    RunStatus::Running,
                    RunStatus::WaitingOnApproval,
                ],
                RunStatus::Cancelled,
                None,
            )
            .await?;
        self.approvals.take(run_id).await;
        info!("Run {} cancelled", run_id);
        Ok(())
    }

    /// The persisted state of a run
    pub async fn get_run_status(&self, run_id: &str) -> EngineResult<WorkflowRun> {
        self.run_store.get_run(run_id).await
    }

    /// The run's per-step execution records
    pub async fn step_records(&self, run_id: &str) -> EngineResult<Vec<StepRecord>> {
        self.run_store.step_records(run_id).await
    }

    /// The run's execution context as last persisted
    pub async fn run_context(&self, run_id: &str) -> EngineResult<ExecutionContext> {
        self.run_store.load_context(run_id).await
    }

    /// The pending approval request for a suspended run, if any
    pub async fn pending_approval(&self, run_id: &str) -> Option<ApprovalRequest> {
        self.approvals.get(run_id).await
    }

    /// The settings this engine was built with
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Resume every non-terminal run from its persisted step index.
    ///
    /// Called once after a process restart. Runs left `Pending` or
    /// `Running` by a crash pick up where their context points;
    /// completed steps are skipped via their step records, so a step
    /// that finished before the crash is not executed twice. Suspended
    /// runs stay suspended until a decision arrives.
    pub async fn recover(&self) -> EngineResult<Vec<String>> {
        let mut resumed = Vec::new();
        for run in self.run_store.list_runs(None).await? {
            match run.status {
                RunStatus::Pending | RunStatus::Running => {
                    info!("Recovering run {} ({})", run.run_id, run.status);
                    let engine = self.clone();
                    let run_id = run.run_id.clone();
                    tokio::spawn(async move {
                        engine.advance(&run_id).await;
                    });
                    resumed.push(run.run_id);
                }
                RunStatus::WaitingOnApproval => {
                    debug!("Run {} stays suspended across restart", run.run_id);
                }
                _ => {}
            }
        }
        Ok(resumed)
    }

    async fn resolve_decider(&self, decided_by: &str) -> UserIdentity {
        match self
            .identity
            .resolve_approver(&ApproverSelector::User(decided_by.to_string()))
            .await
        {
            Ok(identity) => identity,
            Err(err) => {
                warn!("Could not resolve decider '{}': {}", decided_by, err);
                UserIdentity::new(decided_by, decided_by)
            }
        }
    }

    async fn fail_run(&self, run_id: &str, reason: String) -> EngineResult<()> {
        match self
            .run_store
            .transition(run_id, &[RunStatus::Running], RunStatus::Failed, Some(reason))
            .await
        {
            Ok(_) => Ok(()),
            // Lost the race with a cancel; the terminal state stands
            Err(EngineError::AlreadyTerminal(_)) | Err(EngineError::InvalidRunState { .. }) => {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drive a run forward, logging rather than propagating store
    /// failures: this runs on a detached task with no caller to
    /// return to.
    async fn advance(&self, run_id: &str) {
        if let Err(err) = self.advance_inner(run_id).await {
            error!("Run {} halted on storage error: {}", run_id, err);
        }
    }

    async fn advance_inner(&self, run_id: &str) -> EngineResult<()> {
        match self
            .run_store
            .transition(
                run_id,
                &[RunStatus::Pending, RunStatus::Running],
                RunStatus::Running,
                None,
            )
            .await
        {
            Ok(_) => {}
            // Another worker owns the run, or it already finished
            Err(EngineError::InvalidRunState { .. }) | Err(EngineError::AlreadyTerminal(_)) => {
                return Ok(())
            }
            Err(err) => return Err(err),
        }

        let mut context = self.run_store.load_context(run_id).await?;
        let definition = match self.definitions.get(&context.workflow_id).await {
            Ok(definition) => definition,
            Err(err) => {
                self.fail_run(run_id, err.to_string()).await?;
                return Ok(());
            }
        };

        let completed: HashSet<String> = self
            .run_store
            .step_records(run_id)
            .await?
            .into_iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step_id)
            .collect();

        while context.current_step_index < definition.steps.len() {
            // Cooperative cancellation: checked between steps, never
            // interrupting one mid-flight
            if self.run_store.get_run(run_id).await?.status == RunStatus::Cancelled {
                debug!("Run {} observed cancellation, stopping", run_id);
                return Ok(());
            }

            let step = &definition.steps[context.current_step_index];
            if completed.contains(&step.id) {
                debug!(
                    "Run {} skipping already-completed step '{}' on replay",
                    run_id, step.id
                );
                context.advance();
                self.run_store.save_context(&context).await?;
                continue;
            }

            let executor = match self.registry.executor_for(step.kind()) {
                Ok(executor) => executor,
                Err(err) => {
                    self.fail_run(run_id, err.to_string()).await?;
                    return Ok(());
                }
            };

            debug!(
                "Run {} executing step '{}' ({}) at index {}",
                run_id,
                step.id,
                step.kind(),
                context.current_step_index
            );

            let mut attempt: u32 = 1;
            let outcome = loop {
                match executor.execute(step, &mut context, attempt).await {
                    ExecutionResult::Retry { after_ms } => {
                        sleep(Duration::from_millis(after_ms)).await;
                        if self.run_store.get_run(run_id).await?.status == RunStatus::Cancelled {
                            debug!("Run {} cancelled while backing off", run_id);
                            return Ok(());
                        }
                        attempt += 1;
                    }
                    other => break other,
                }
            };

            match outcome {
                ExecutionResult::Continue => {
                    context.advance();
                    // Context first, then the completion record: a crash
                    // between the two re-executes the step (at-least-once)
                    // instead of skipping it with stale variables
                    self.run_store.save_context(&context).await?;
                    self.run_store
                        .record_step(StepRecord::new(
                            run_id,
                            &step.id,
                            StepStatus::Completed,
                            attempt,
                        ))
                        .await?;
                }
                ExecutionResult::Suspend { resume_key } => {
                    self.run_store.save_context(&context).await?;
                    self.run_store
                        .record_step(
                            StepRecord::new(run_id, &step.id, StepStatus::Waiting, attempt)
                                .with_detail(resume_key),
                        )
                        .await?;
                    match self
                        .run_store
                        .transition(
                            run_id,
                            &[RunStatus::Running],
                            RunStatus::WaitingOnApproval,
                            None,
                        )
                        .await
                    {
                        Ok(_) => {
                            info!("Run {} suspended at step '{}'", run_id, step.id);
                        }
                        // Cancelled while the step was in flight; the
                        // pending request is moot
                        Err(EngineError::AlreadyTerminal(_))
                        | Err(EngineError::InvalidRunState { .. }) => {
                            self.approvals.take(run_id).await;
                        }
                        Err(err) => return Err(err),
                    }
                    return Ok(());
                }
                ExecutionResult::Fail { reason } => {
                    warn!("Run {} failed at step '{}': {}", run_id, step.id, reason);
                    self.run_store.save_context(&context).await?;
                    self.run_store
                        .record_step(
                            StepRecord::new(run_id, &step.id, StepStatus::Failed, attempt)
                                .with_detail(reason.clone()),
                        )
                        .await?;
                    self.fail_run(run_id, reason).await?;
                    return Ok(());
                }
                ExecutionResult::Retry { .. } => unreachable!("retry handled in attempt loop"),
            }
        }

        match self
            .run_store
            .transition(run_id, &[RunStatus::Running], RunStatus::Completed, None)
            .await
        {
            Ok(_) => {
                info!("Run {} completed", run_id);
                Ok(())
            }
            // Cancelled after the final step finished
            Err(EngineError::AlreadyTerminal(_)) | Err(EngineError::InvalidRunState { .. }) => {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Builder wiring an [`Engine`] to its collaborators.
pub struct EngineBuilder {
    identity: Option<Arc<dyn IdentityProvider>>,
    transport: Option<Arc<dyn NotificationTransport>>,
    handlers: Option<Arc<ActionHandlers>>,
    run_store: Option<Arc<dyn RunStore>>,
    settings: EngineSettings,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("settings", &self.settings)
            .finish()
    }
}

impl EngineBuilder {
    /// Start with default settings and no collaborators
    pub fn new() -> Self {
        Self {
            identity: None,
            transport: None,
            handlers: None,
            run_store: None,
            settings: EngineSettings::default(),
        }
    }

    /// Identity provider used to resolve approvers and deciders (required)
    pub fn identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Transport used to deliver notifications (required)
    pub fn notification_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Application action handlers invoked by `action` steps
    pub fn action_handlers(mut self, handlers: ActionHandlers) -> Self {
        self.handlers = Some(Arc::new(handlers));
        self
    }

    /// Run store; defaults to [`InMemoryRunStore`]
    pub fn run_store(mut self, run_store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(run_store);
        self
    }

    /// Engine settings; defaults to [`EngineSettings`]'s defaults
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wire everything together
    pub fn build(self) -> EngineResult<Engine> {
        let identity = self
            .identity
            .ok_or_else(|| EngineError::Config("engine requires an identity provider".to_string()))?;
        let transport = self.transport.ok_or_else(|| {
            EngineError::Config("engine requires a notification transport".to_string())
        })?;
        let handlers = self.handlers.unwrap_or_else(|| Arc::new(ActionHandlers::new()));
        let run_store: Arc<dyn RunStore> = self
            .run_store
            .unwrap_or_else(|| Arc::new(InMemoryRunStore::new()));

        let ledger = Arc::new(ApprovalLedger::new());
        let registry = Arc::new(standard_registry(
            Arc::clone(&identity),
            transport,
            handlers,
            Arc::clone(&ledger),
            self.settings.retry.clone(),
        )?);
        let definitions = Arc::new(DefinitionStore::new(Arc::clone(&registry)));

        Ok(Engine {
            definitions,
            registry,
            run_store,
            approvals: ledger,
            identity,
            settings: self.settings,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
