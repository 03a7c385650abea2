use thiserror::Error;

use crate::definition::StepKind;
use crate::run::RunStatus;

/// A specialized Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Represents errors that can occur while registering definitions or
/// driving workflow runs.
///
/// The variants fall into three groups with different handling rules:
/// configuration errors (never retried, surfaced to the registering
/// caller), state errors (caller mistakes, surfaced synchronously), and
/// storage errors (propagated from the run store). Transient step
/// failures are not represented here: they are retried by the
/// orchestrator and, once exhausted, recorded on the run's `last_error`
/// field rather than returned to any caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A step type was registered twice in the same registry
    #[error("step type already registered: {0}")]
    DuplicateStepType(StepKind),

    /// A step's config does not satisfy the schema required by its type
    #[error("invalid config for step '{step_id}': {reason}")]
    InvalidStepConfig {
        /// Id of the offending step
        step_id: String,
        /// What the validator rejected
        reason: String,
    },

    /// A definition failed validation; all per-step failures are aggregated
    #[error("invalid definition '{id}': {}", .problems.join("; "))]
    InvalidDefinition {
        /// Id of the rejected definition
        id: String,
        /// Every validation failure found, one entry per problem
        problems: Vec<String>,
    },

    /// No definition registered under the requested id
    #[error("definition not found: {0}")]
    DefinitionNotFound(String),

    /// A definition with this id is already registered
    #[error("definition already registered: {0}")]
    DuplicateDefinition(String),

    /// No run known under the requested id
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// No action handler registered under the configured name
    #[error("unknown action handler: {0}")]
    UnknownActionHandler(String),

    /// The run is not in a state that permits the requested operation
    #[error("run '{run_id}' is {actual}, expected {expected}")]
    InvalidRunState {
        /// Id of the run
        run_id: String,
        /// State the operation requires
        expected: String,
        /// State the run was actually in
        actual: RunStatus,
    },

    /// The run already reached a terminal state and cannot change again
    #[error("run '{0}' already reached a terminal state")]
    AlreadyTerminal(String),

    /// Settings file could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// The run store failed to persist or load run state
    #[error("storage error: {0}")]
    Storage(String),
}
