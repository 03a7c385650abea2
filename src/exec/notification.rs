use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::definition::{StepConfig, WorkflowStep};
use crate::run::ExecutionContext;

use super::{ExecutionResult, RetryConfig, StepExecutor};

/// Collaborator that delivers a rendered message over a channel.
///
/// Implemented by the surrounding application (email gateway, chat
/// webhook, ...). Delivery failures are treated as transient.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Deliver the message over the named channel
    async fn send(&self, channel: &str, message: &str) -> anyhow::Result<()>;
}

/// Render a `{{variable}}` template against the run's variables.
///
/// String variables substitute as-is; other JSON values substitute in
/// their compact JSON form. An unknown placeholder is an error: a
/// template referencing a variable no step produced is a definition
/// mistake, not a transient fault.
pub fn render_template(
    template: &str,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<String, String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| format!("unclosed placeholder in template: '{}'", template))?;
        let key = after[..end].trim();

        let value = variables
            .get(key)
            .ok_or_else(|| format!("template references unknown variable '{}'", key))?;
        match value {
            serde_json::Value::String(s) => rendered.push_str(s),
            other => rendered.push_str(&other.to_string()),
        }

        rest = &after[end + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Executor for `notification` steps.
///
/// Renders the configured template and hands it to the transport.
/// Transport failures are retried with exponential backoff up to the
/// configured attempt budget; render failures are terminal.
pub struct NotificationExecutor {
    transport: Arc<dyn NotificationTransport>,
    retry: RetryConfig,
}

impl fmt::Debug for NotificationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationExecutor")
            .field("retry", &self.retry)
            .finish()
    }
}

impl NotificationExecutor {
    /// Create an executor backed by the given transport
    pub fn new(transport: Arc<dyn NotificationTransport>, retry: RetryConfig) -> Self {
        Self { transport, retry }
    }
}

#[async_trait]
impl StepExecutor for NotificationExecutor {
    #[instrument(skip(self, step, context), fields(step.id = %step.id, run.id = %context.run_id, attempt))]
    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &mut ExecutionContext,
        attempt: u32,
    ) -> ExecutionResult {
        let (channel, template) = match &step.config {
            StepConfig::Notification { channel, template } => (channel, template),
            other => {
                return ExecutionResult::Fail {
                    reason: format!(
                        "step '{}' routed to notification executor with {} config",
                        step.id,
                        other.kind()
                    ),
                }
            }
        };

        let message = match render_template(template, &context.variables) {
            Ok(message) => message,
            Err(reason) => {
                return ExecutionResult::Fail {
                    reason: format!("step '{}': {}", step.id, reason),
                }
            }
        };

        match self.transport.send(channel, &message).await {
            Ok(()) => {
                debug!("Sent notification for step {} via {}", step.id, channel);
                ExecutionResult::Continue
            }
            Err(err) if attempt >= self.retry.max_attempts => {
                warn!(
                    "Notification for step {} failed after {} attempts: {}",
                    step.id, attempt, err
                );
                ExecutionResult::Fail {
                    reason: format!(
                        "notification via '{}' failed after {} attempts: {}",
                        channel, attempt, err
                    ),
                }
            }
            Err(err) => {
                let after_ms = self.retry.delay_for_attempt(attempt);
                warn!(
                    "Notification for step {} failed (attempt {}/{}), retrying in {}ms: {}",
                    step.id, attempt, self.retry.max_attempts, after_ms, err
                );
                ExecutionResult::Retry { after_ms }
            }
        }
    }
}

/// Validate a notification step's config: channel and template must be
/// non-empty and every placeholder must be closed.
pub fn validate_config(step: &WorkflowStep) -> Result<(), String> {
    match &step.config {
        StepConfig::Notification { channel, template } => {
            if channel.trim().is_empty() {
                return Err("notification step requires a non-empty channel".to_string());
            }
            if template.trim().is_empty() {
                return Err("notification step requires a non-empty template".to_string());
            }
            let mut rest = template.as_str();
            while let Some(start) = rest.find("{{") {
                match rest[start + 2..].find("}}") {
                    Some(end) => rest = &rest[start + 2 + end + 2..],
                    None => return Err(format!("unclosed placeholder in template: '{}'", template)),
                }
            }
            Ok(())
        }
        other => Err(format!(
            "step '{}' declares kind {} but was validated as notification",
            step.id,
            other.kind()
        )),
    }
}
