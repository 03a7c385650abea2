//! Workflow definitions: typed steps, trigger events, and the store
//! that validates and holds published definitions.

/// Trigger event type
pub mod event;
/// Step types and per-type configuration
pub mod step;
/// Validated definition storage and trigger lookup
pub mod store;

pub use event::TriggerEvent;
pub use step::{ApproverSelector, StepConfig, StepKind, WorkflowStep};
pub use store::DefinitionStore;

use serde::{Deserialize, Serialize};

/// A workflow definition: an ordered step sequence plus the trigger
/// events that start a run.
///
/// Definitions are immutable once registered. An update is published
/// under a new id; in-flight runs keep executing against the definition
/// they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Definition id, unique across the store
    pub id: String,

    /// Human-readable workflow name
    pub name: String,

    /// Ordered steps; order is execution order
    pub steps: Vec<WorkflowStep>,

    /// Event names that start a run of this definition
    pub triggers: Vec<String>,
}

impl WorkflowDefinition {
    /// Create a new definition
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Append a step, preserving order
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a trigger event name
    pub fn with_trigger(mut self, event_name: impl Into<String>) -> Self {
        self.triggers.push(event_name.into());
        self
    }

    /// Whether this definition is started by the named event
    pub fn has_trigger(&self, event_name: &str) -> bool {
        self.triggers.iter().any(|t| t == event_name)
    }
}
