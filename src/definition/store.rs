use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{EngineError, EngineResult};
use crate::registry::StepRegistry;

use super::WorkflowDefinition;

/// Validates and stores published workflow definitions.
///
/// Registration is all-or-nothing: a definition becomes visible only
/// after every check passed, so concurrent readers never observe a
/// partially validated definition. Reads are concurrent; the store is
/// read-mostly after startup.
#[derive(Debug)]
pub struct DefinitionStore {
    registry: Arc<StepRegistry>,
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl DefinitionStore {
    /// Create an empty store validating against the given registry
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and store a definition.
    ///
    /// Every problem found is collected before rejecting, so the caller
    /// sees all per-step failures at once rather than one per attempt.
    #[instrument(skip(self, definition), fields(definition.id = %definition.id))]
    pub async fn register(&self, definition: WorkflowDefinition) -> EngineResult<()> {
        let mut problems = Vec::new();

        if definition.steps.is_empty() {
            problems.push("definition has no steps".to_string());
        }
        if definition.triggers.is_empty() {
            problems.push("definition has no triggers and can never run".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for step in &definition.steps {
            if !seen.insert(step.id.as_str()) {
                problems.push(format!("duplicate step id '{}'", step.id));
            }
            if let Err(err) = self.registry.validate(step) {
                problems.push(err.to_string());
            }
        }

        if !problems.is_empty() {
            return Err(EngineError::InvalidDefinition {
                id: definition.id,
                problems,
            });
        }

        let mut definitions = self.definitions.write().await;
        if definitions.contains_key(&definition.id) {
            return Err(EngineError::DuplicateDefinition(definition.id));
        }
        debug!("Registered workflow definition: {}", definition.id);
        definitions.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    /// Look up a definition by id
    pub async fn get(&self, id: &str) -> EngineResult<Arc<WorkflowDefinition>> {
        self.definitions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound(id.to_string()))
    }

    /// All definitions whose trigger set contains the named event.
    ///
    /// Used by the orchestrator to fan a single trigger event out to
    /// every matching workflow.
    pub async fn find_by_trigger(&self, event_name: &str) -> Vec<Arc<WorkflowDefinition>> {
        self.definitions
            .read()
            .await
            .values()
            .filter(|d| d.has_trigger(event_name))
            .cloned()
            .collect()
    }

    /// All registered definitions
    pub async fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.definitions.read().await.values().cloned().collect()
    }

    /// Number of registered definitions
    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    /// Whether no definition has been registered yet
    pub async fn is_empty(&self) -> bool {
        self.definitions.read().await.is_empty()
    }
}
