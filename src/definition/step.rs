use std::fmt;

use serde::{Deserialize, Serialize};

/// The three step kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Suspend the run until a human approves or rejects
    Approval,
    /// Render a template and deliver it over a notification channel
    Notification,
    /// Invoke an application-registered handler with the run's variables
    Action,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approval => "approval",
            Self::Notification => "notification",
            Self::Action => "action",
        };
        write!(f, "{}", s)
    }
}

/// Selects the approver for an approval step, either by role (resolved
/// to a concrete user at execution time) or by explicit user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverSelector {
    /// Any user holding the named role
    Role(String),
    /// A specific user id
    User(String),
}

impl ApproverSelector {
    /// The raw role or user id string inside the selector
    pub fn as_str(&self) -> &str {
        match self {
            Self::Role(s) | Self::User(s) => s,
        }
    }
}

/// Type-specific step configuration.
///
/// Modeled as a tagged variant rather than an untyped map so each
/// executor statically knows its required fields and validation is a
/// pure function per variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Config for an approval step
    Approval {
        /// Who must approve before the run continues
        approver: ApproverSelector,
    },
    /// Config for a notification step
    Notification {
        /// Delivery channel name, e.g. `"email"`
        channel: String,
        /// Message template with `{{variable}}` placeholders
        template: String,
    },
    /// Config for an action step
    Action {
        /// Name of the registered handler to invoke
        handler_name: String,
    },
}

impl StepConfig {
    /// The step kind this config belongs to
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Approval { .. } => StepKind::Approval,
            Self::Notification { .. } => StepKind::Notification,
            Self::Action { .. } => StepKind::Action,
        }
    }
}

/// One unit of work within a workflow definition.
///
/// Steps are created at definition-authoring time and never mutated;
/// they live and die with the definition that owns them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id, unique within the owning definition
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// Type-specific configuration; the variant tag is the step type
    pub config: StepConfig,
}

impl WorkflowStep {
    /// Create a new step
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: StepConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
        }
    }

    /// The step's kind, taken from its config variant
    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_from_config() {
        let step = WorkflowStep::new(
            "notify",
            "Notify",
            StepConfig::Notification {
                channel: "email".to_string(),
                template: "hello {{name}}".to_string(),
            },
        );
        assert_eq!(step.kind(), StepKind::Notification);
        assert_eq!(step.kind().to_string(), "notification");
    }

    #[test]
    fn test_step_config_serialization_tags() {
        let config = StepConfig::Action {
            handler_name: "createEmployeeRecord".to_string(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["handler_name"], "createEmployeeRecord");

        let parsed: StepConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind(), StepKind::Action);
    }

    #[test]
    fn test_approver_selector_as_str() {
        assert_eq!(ApproverSelector::Role("hr-manager".to_string()).as_str(), "hr-manager");
        assert_eq!(ApproverSelector::User("user-7".to_string()).as_str(), "user-7");
    }
}
