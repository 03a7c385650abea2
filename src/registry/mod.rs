//! Step type registry: maps each step kind to its config validator and
//! executor.
//!
//! The registry is explicitly constructed and handed to the engine at
//! startup; there is no ambient singleton. After construction it is
//! read-only, so it can be shared across orchestrator workers behind an
//! `Arc` without locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::definition::{StepKind, WorkflowStep};
use crate::error::{EngineError, EngineResult};
use crate::exec::StepExecutor;

/// Validates a step's config against the schema its type requires.
/// Returns a human-readable reason on rejection.
pub type ConfigValidator = Box<dyn Fn(&WorkflowStep) -> Result<(), String> + Send + Sync>;

struct StepTypeEntry {
    validator: ConfigValidator,
    executor: Arc<dyn StepExecutor>,
}

/// Registry of step types known to the engine.
pub struct StepRegistry {
    entries: HashMap<StepKind, StepTypeEntry>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StepRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register the validator and executor for a step kind.
    ///
    /// Fails if the kind is already registered; registration happens
    /// once at startup and is never replaced in place.
    pub fn register_step_type(
        &mut self,
        kind: StepKind,
        validator: ConfigValidator,
        executor: Arc<dyn StepExecutor>,
    ) -> EngineResult<()> {
        if self.entries.contains_key(&kind) {
            return Err(EngineError::DuplicateStepType(kind));
        }
        self.entries.insert(
            kind,
            StepTypeEntry {
                validator,
                executor,
            },
        );
        Ok(())
    }

    /// Run the registered validator against the step's config
    pub fn validate(&self, step: &WorkflowStep) -> EngineResult<()> {
        let entry = self.entries.get(&step.kind()).ok_or_else(|| {
            EngineError::InvalidStepConfig {
                step_id: step.id.clone(),
                reason: format!("no step type registered for '{}'", step.kind()),
            }
        })?;

        (entry.validator)(step).map_err(|reason| EngineError::InvalidStepConfig {
            step_id: step.id.clone(),
            reason,
        })
    }

    /// The executor registered for a step kind
    pub fn executor_for(&self, kind: StepKind) -> EngineResult<Arc<dyn StepExecutor>> {
        self.entries
            .get(&kind)
            .map(|e| Arc::clone(&e.executor))
            .ok_or_else(|| EngineError::InvalidStepConfig {
                step_id: String::new(),
                reason: format!("no step type registered for '{}'", kind),
            })
    }

    /// Step kinds currently registered
    pub fn kinds(&self) -> Vec<StepKind> {
        self.entries.keys().copied().collect()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
