#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_html_tags)]
#![deny(rustdoc::bare_urls)]
#![deny(clippy::missing_panics_doc)]

//! Embeddable workflow engine: typed step definitions, trigger fan-out,
//! and durable run orchestration with suspension, retry, and cooperative
//! cancellation.
//!
//! The engine is a library invoked by the surrounding application, not a
//! network service. The application supplies the collaborators — an
//! identity provider for approver resolution, a notification transport,
//! a table of business action handlers, and (in production) a durable
//! run store — and registers workflow definitions. Trigger events then
//! fan out to every matching definition, each creating an independent
//! run whose steps execute strictly in order.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use workflow_engine::{
//!     ActionHandlers, ApproverSelector, Engine, IdentityProvider, NotificationTransport,
//!     StepConfig, UserIdentity, WorkflowDefinition, WorkflowStep,
//! };
//!
//! # #[derive(Debug)]
//! # struct Directory;
//! # #[async_trait::async_trait]
//! # impl IdentityProvider for Directory {
//! #     async fn resolve_approver(
//! #         &self,
//! #         selector: &ApproverSelector,
//! #     ) -> anyhow::Result<UserIdentity> {
//! #         Ok(UserIdentity::new(selector.as_str(), "Reviewer"))
//! #     }
//! # }
//! # #[derive(Debug)]
//! # struct Mailer;
//! # #[async_trait::async_trait]
//! # impl NotificationTransport for Mailer {
//! #     async fn send(&self, _channel: &str, _message: &str) -> anyhow::Result<()> {
//! #         Ok(())
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut handlers = ActionHandlers::new();
//!     handlers.register_fn(
//!         "createEmployeeRecord",
//!         |vars: HashMap<String, serde_json::Value>| async move { Ok(vars) },
//!     );
//!
//!     let engine = Engine::builder()
//!         .identity_provider(Arc::new(Directory))
//!         .notification_transport(Arc::new(Mailer))
//!         .action_handlers(handlers)
//!         .build()?;
//!
//!     let definition = WorkflowDefinition::new("onboard", "Employee onboarding")
//!         .with_step(WorkflowStep::new(
//!             "welcome",
//!             "Welcome email",
//!             StepConfig::Notification {
//!                 channel: "email".to_string(),
//!                 template: "Welcome {{name}}".to_string(),
//!             },
//!         ))
//!         .with_step(WorkflowStep::new(
//!             "record",
//!             "Create record",
//!             StepConfig::Action {
//!                 handler_name: "createEmployeeRecord".to_string(),
//!             },
//!         ))
//!         .with_trigger("employee.hired");
//!     engine.register_workflow(definition).await?;
//!
//!     let mut variables = HashMap::new();
//!     variables.insert("name".to_string(), serde_json::json!("A"));
//!     let run_ids = engine.trigger("employee.hired", variables).await?;
//!     println!("Started runs: {:?}", run_ids);
//!
//!     Ok(())
//! }
//! ```

/// Engine settings and tracing initialization
pub mod config;

/// Workflow definitions, steps, trigger events, and the definition store
pub mod definition;

/// The orchestrator driving runs through their steps
pub mod engine;

/// Error types for the engine
pub mod error;

/// Step executors and their collaborator traits
pub mod exec;

/// Step type registry
pub mod registry;

/// Run-side state: contexts, run projections, step records
pub mod run;

/// Durable run storage contract and in-memory implementation
pub mod store;

// Re-export the definition vocabulary
pub use definition::{
    ApproverSelector, DefinitionStore, StepConfig, StepKind, TriggerEvent, WorkflowDefinition,
    WorkflowStep,
};

// Re-export execution types
pub use exec::{
    ActionHandler, ActionHandlers, ApprovalDecision, ApprovalLedger, ApprovalRequest,
    ExecutionResult, IdentityProvider, NotificationTransport, RetryConfig, StepExecutor,
    UserIdentity,
};

// Re-export the orchestrator and run state
pub use engine::{Engine, EngineBuilder};
pub use run::{ExecutionContext, RunStatus, StepRecord, StepStatus, WorkflowRun};
pub use store::{InMemoryRunStore, RunStore};

// Re-export error types
pub use error::{EngineError, EngineResult};

// Re-export settings helpers
pub use config::{get_settings, init_tracing, EngineSettings, LoggerSettings};

pub use registry::StepRegistry;
