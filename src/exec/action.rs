use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, instrument, warn};

use crate::definition::{StepConfig, WorkflowStep};
use crate::error::EngineError;
use crate::run::ExecutionContext;

use super::{ExecutionResult, RetryConfig, StepExecutor};

/// Variable bag passed to and returned from action handlers.
pub type ActionVariables = HashMap<String, serde_json::Value>;

/// Collaborator wrapping one piece of application business logic,
/// e.g. "create employee record".
///
/// Handlers receive the run's current variables and return key/values
/// to merge back in. Errors are opaque to the engine and treated as
/// transient.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Invoke the handler with the run's variables
    async fn invoke(&self, variables: &ActionVariables) -> anyhow::Result<ActionVariables>;
}

struct FnActionHandler {
    f: Box<dyn Fn(ActionVariables) -> BoxFuture<'static, anyhow::Result<ActionVariables>> + Send + Sync>,
}

#[async_trait]
impl ActionHandler for FnActionHandler {
    async fn invoke(&self, variables: &ActionVariables) -> anyhow::Result<ActionVariables> {
        (self.f)(variables.clone()).await
    }
}

/// Application-registered table of action handlers, keyed by name.
///
/// Populated at startup and read-only afterwards, so the engine can
/// share it across workers without locking.
#[derive(Default)]
pub struct ActionHandlers {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl fmt::Debug for ActionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandlers")
            .field("names", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionHandlers {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a name, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(ActionVariables) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ActionVariables>> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(FnActionHandler {
                f: Box::new(move |vars| Box::pin(f(vars))),
            }),
        );
    }

    /// Look up a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Executor for `action` steps.
///
/// Looks the handler up by name, invokes it with the run's variables,
/// and merges the returned key/values back into the context. An
/// unknown handler name is a configuration error and fails fast;
/// handler errors are transient and retried with backoff.
pub struct ActionExecutor {
    handlers: Arc<ActionHandlers>,
    retry: RetryConfig,
}

impl fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("retry", &self.retry)
            .finish()
    }
}

impl ActionExecutor {
    /// Create an executor backed by the given handler table
    pub fn new(handlers: Arc<ActionHandlers>, retry: RetryConfig) -> Self {
        Self { handlers, retry }
    }
}

#[async_trait]
impl StepExecutor for ActionExecutor {
    #[instrument(skip(self, step, context), fields(step.id = %step.id, run.id = %context.run_id, attempt))]
    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &mut ExecutionContext,
        attempt: u32,
    ) -> ExecutionResult {
        let handler_name = match &step.config {
            StepConfig::Action { handler_name } => handler_name,
            other => {
                return ExecutionResult::Fail {
                    reason: format!(
                        "step '{}' routed to action executor with {} config",
                        step.id,
                        other.kind()
                    ),
                }
            }
        };

        let handler = match self.handlers.get(handler_name) {
            Some(handler) => handler,
            None => {
                // Configuration error, not a transient fault: fail fast
                return ExecutionResult::Fail {
                    reason: EngineError::UnknownActionHandler(handler_name.clone()).to_string(),
                };
            }
        };

        match handler.invoke(&context.variables).await {
            Ok(updates) => {
                debug!(
                    "Action handler '{}' for step {} returned {} variables",
                    handler_name,
                    step.id,
                    updates.len()
                );
                context.merge_variables(updates);
                ExecutionResult::Continue
            }
            Err(err) if attempt >= self.retry.max_attempts => {
                warn!(
                    "Action handler '{}' failed after {} attempts: {}",
                    handler_name, attempt, err
                );
                ExecutionResult::Fail {
                    reason: format!(
                        "action handler '{}' failed after {} attempts: {}",
                        handler_name, attempt, err
                    ),
                }
            }
            Err(err) => {
                let after_ms = self.retry.delay_for_attempt(attempt);
                warn!(
                    "Action handler '{}' failed (attempt {}/{}), retrying in {}ms: {}",
                    handler_name, attempt, self.retry.max_attempts, after_ms, err
                );
                ExecutionResult::Retry { after_ms }
            }
        }
    }
}

/// Validate an action step's config: the handler name must be
/// non-empty. Handler existence is checked at execution time, since
/// handlers may register after definitions.
pub fn validate_config(step: &WorkflowStep) -> Result<(), String> {
    match &step.config {
        StepConfig::Action { handler_name } => {
            if handler_name.trim().is_empty() {
                Err("action step requires a non-empty handler name".to_string())
            } else {
                Ok(())
            }
        }
        other => Err(format!(
            "step '{}' declares kind {} but was validated as action",
            step.id,
            other.kind()
        )),
    }
}
