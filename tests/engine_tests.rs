//! End-to-end tests driving the engine through trigger, suspension,
//! resume, cancellation, retry, and crash recovery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{sleep, Duration};

use workflow_engine::{
    ActionHandlers, ApprovalDecision, ApproverSelector, Engine, EngineError, EngineSettings,
    ExecutionContext, IdentityProvider, InMemoryRunStore, NotificationTransport, RetryConfig,
    RunStatus, RunStore, StepConfig, StepRecord, StepStatus, TriggerEvent, UserIdentity,
    WorkflowDefinition, WorkflowRun, WorkflowStep,
};

#[derive(Debug)]
struct Directory;

#[async_trait]
impl IdentityProvider for Directory {
    async fn resolve_approver(&self, selector: &ApproverSelector) -> anyhow::Result<UserIdentity> {
        match selector {
            ApproverSelector::Role(role) if role == "hr-manager" => {
                Ok(UserIdentity::new("user-7", "Dana Reviewer"))
            }
            ApproverSelector::Role(role) => Err(anyhow::anyhow!("no user holds role '{}'", role)),
            ApproverSelector::User(id) => Ok(UserIdentity::new(id.clone(), format!("User {}", id))),
        }
    }
}

#[derive(Debug, Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    failures_remaining: AtomicU32,
}

impl RecordingTransport {
    fn failing(times: u32) -> Self {
        let transport = Self::default();
        transport.failures_remaining.store(times, Ordering::SeqCst);
        transport
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, channel: &str, message: &str) -> anyhow::Result<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("transport unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry: RetryConfig {
            max_attempts: 3,
            initial_interval_ms: 5,
            max_interval_ms: 20,
            backoff_coefficient: 2.0,
            jitter: 0.0,
        },
        ..EngineSettings::default()
    }
}

fn notification_step(id: &str, template: &str) -> WorkflowStep {
    WorkflowStep::new(
        id,
        id,
        StepConfig::Notification {
            channel: "email".to_string(),
            template: template.to_string(),
        },
    )
}

fn action_step(id: &str, handler: &str) -> WorkflowStep {
    WorkflowStep::new(
        id,
        id,
        StepConfig::Action {
            handler_name: handler.to_string(),
        },
    )
}

fn approval_step(id: &str, role: &str) -> WorkflowStep {
    WorkflowStep::new(
        id,
        id,
        StepConfig::Approval {
            approver: ApproverSelector::Role(role.to_string()),
        },
    )
}

async fn wait_for(engine: &Engine, run_id: &str, wanted: RunStatus) -> WorkflowRun {
    for _ in 0..300 {
        let run = engine.get_run_status(run_id).await.unwrap();
        if run.status == wanted {
            return run;
        }
        assert!(
            !(run.status.is_terminal() && run.status != wanted),
            "run reached {} while waiting for {} (last_error: {:?})",
            run.status,
            wanted,
            run.last_error
        );
        sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} never reached {}", run_id, wanted);
}

#[tokio::test]
async fn test_onboard_scenario() {
    let transport = Arc::new(RecordingTransport::default());
    let invocations = Arc::new(AtomicU32::new(0));

    let mut handlers = ActionHandlers::new();
    let counter = Arc::clone(&invocations);
    handlers.register_fn("createEmployeeRecord", move |vars: HashMap<String, serde_json::Value>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut out = HashMap::new();
            out.insert("employee_id".to_string(), json!("emp-1"));
            out.insert("email_used".to_string(), vars["email"].clone());
            Ok(out)
        }
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("onboard", "Employee onboarding")
                .with_step(notification_step("welcome", "Welcome {{name}}"))
                .with_step(action_step("record", "createEmployeeRecord"))
                .with_trigger("employee.hired"),
        )
        .await
        .unwrap();

    let mut variables = HashMap::new();
    variables.insert("email".to_string(), json!("a@b.com"));
    variables.insert("name".to_string(), json!("A"));

    let run_ids = engine.trigger("employee.hired", variables).await.unwrap();
    assert_eq!(run_ids.len(), 1);

    let run = wait_for(&engine, &run_ids[0], RunStatus::Completed).await;
    assert_eq!(run.workflow_id, "onboard");
    assert!(run.completed_at.is_some());
    assert!(run.last_error.is_none());

    // notification sent exactly once, rendered against the variables
    assert_eq!(transport.sent(), vec![("email".to_string(), "Welcome A".to_string())]);
    // handler invoked exactly once, its output merged into the context
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let context = engine.run_context(&run_ids[0]).await.unwrap();
    assert_eq!(context.variables["employee_id"], json!("emp-1"));
    assert_eq!(context.variables["email_used"], json!("a@b.com"));
}

#[tokio::test]
async fn test_trigger_event_payload_becomes_variables() {
    let transport = Arc::new(RecordingTransport::default());

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("greeter", "Greeter")
                .with_step(notification_step("hello", "Hi {{name}}"))
                .with_trigger("employee.hired"),
        )
        .await
        .unwrap();

    let event = TriggerEvent::new("employee.hired", Some(json!({"name": "B"})));
    let run_ids = engine.trigger_event(event).await.unwrap();
    assert_eq!(run_ids.len(), 1);

    wait_for(&engine, &run_ids[0], RunStatus::Completed).await;
    assert_eq!(transport.sent()[0].1, "Hi B");
}

#[tokio::test]
async fn test_trigger_without_matching_definition_creates_no_runs() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .build()
        .unwrap();

    let run_ids = engine.trigger("nobody.listens", HashMap::new()).await.unwrap();
    assert!(run_ids.is_empty());
}

#[tokio::test]
async fn test_trigger_fans_out_to_all_matching_definitions() {
    let mut handlers = ActionHandlers::new();
    handlers.register_fn("noop", |_vars: HashMap<String, serde_json::Value>| async move {
        Ok(HashMap::new())
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    for id in ["audit-trail", "badge-request"] {
        engine
            .register_workflow(
                WorkflowDefinition::new(id, id)
                    .with_step(action_step("go", "noop"))
                    .with_trigger("employee.hired"),
            )
            .await
            .unwrap();
    }

    let run_ids = engine.trigger("employee.hired", HashMap::new()).await.unwrap();
    assert_eq!(run_ids.len(), 2);
    for run_id in &run_ids {
        wait_for(&engine, run_id, RunStatus::Completed).await;
    }
}

#[tokio::test]
async fn test_steps_apply_in_definition_order() {
    let transport = Arc::new(RecordingTransport::default());
    let mut handlers = ActionHandlers::new();
    for label in ["a", "b", "c"] {
        handlers.register_fn(
            format!("append-{}", label),
            move |vars: HashMap<String, serde_json::Value>| async move {
                let trace = vars.get("trace").and_then(|v| v.as_str()).unwrap_or("");
                let mut out = HashMap::new();
                out.insert("trace".to_string(), json!(format!("{}{}", trace, label)));
                Ok(out)
            },
        );
    }

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("ordered", "Ordered")
                .with_step(action_step("first", "append-a"))
                .with_step(action_step("second", "append-b"))
                .with_step(action_step("third", "append-c"))
                .with_step(notification_step("report", "trace={{trace}}"))
                .with_trigger("order.check"))
        .await
        .unwrap();

    let run_ids = engine.trigger("order.check", HashMap::new()).await.unwrap();
    wait_for(&engine, &run_ids[0], RunStatus::Completed).await;

    let context = engine.run_context(&run_ids[0]).await.unwrap();
    assert_eq!(context.variables["trace"], json!("abc"));
    assert_eq!(transport.sent()[0].1, "trace=abc");
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let mut handlers = ActionHandlers::new();
    handlers.register_fn("echo", |vars: HashMap<String, serde_json::Value>| async move {
        let mut out = HashMap::new();
        out.insert("echoed".to_string(), vars["who"].clone());
        Ok(out)
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("echo", "Echo")
                .with_step(action_step("go", "echo"))
                .with_trigger("ping"),
        )
        .await
        .unwrap();

    let mut first_vars = HashMap::new();
    first_vars.insert("who".to_string(), json!("one"));
    let mut second_vars = HashMap::new();
    second_vars.insert("who".to_string(), json!("two"));

    let first = engine.trigger("ping", first_vars).await.unwrap();
    let second = engine.trigger("ping", second_vars).await.unwrap();

    wait_for(&engine, &first[0], RunStatus::Completed).await;
    wait_for(&engine, &second[0], RunStatus::Completed).await;

    let first_ctx = engine.run_context(&first[0]).await.unwrap();
    let second_ctx = engine.run_context(&second[0]).await.unwrap();
    assert_eq!(first_ctx.variables["echoed"], json!("one"));
    assert_eq!(second_ctx.variables["echoed"], json!("two"));
}

#[tokio::test]
async fn test_approval_approve_completes_run() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("leave-request", "Leave request")
                .with_step(approval_step("manager-signoff", "hr-manager"))
                .with_trigger("leave.requested"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("leave.requested", HashMap::new()).await.unwrap();
    let run_id = &run_ids[0];

    wait_for(&engine, run_id, RunStatus::WaitingOnApproval).await;

    // the pending request is queryable and carries the resolved approver
    let request = engine.pending_approval(run_id).await.unwrap();
    assert_eq!(request.step_id, "manager-signoff");
    assert_eq!(request.approver.id, "user-7");

    engine
        .resume(run_id, ApprovalDecision::approve("user-7"))
        .await
        .unwrap();

    let run = engine.get_run_status(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let context = engine.run_context(run_id).await.unwrap();
    assert_eq!(context.variables["manager-signoff.approved_by"], json!("user-7"));
}

#[tokio::test]
async fn test_approval_reject_fails_run_with_decider() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("leave-request", "Leave request")
                .with_step(approval_step("manager-signoff", "hr-manager"))
                .with_trigger("leave.requested"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("leave.requested", HashMap::new()).await.unwrap();
    let run_id = &run_ids[0];
    wait_for(&engine, run_id, RunStatus::WaitingOnApproval).await;

    engine
        .resume(
            run_id,
            ApprovalDecision::reject("user-9").with_comment("dates overlap audit"),
        )
        .await
        .unwrap();

    let run = engine.get_run_status(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let last_error = run.last_error.unwrap();
    assert!(last_error.contains("ApprovalRejected"));
    assert!(last_error.contains("User user-9"));
    assert!(last_error.contains("dates overlap audit"));
}

#[tokio::test]
async fn test_resume_on_terminal_run_is_rejected_and_harmless() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("leave-request", "Leave request")
                .with_step(approval_step("manager-signoff", "hr-manager"))
                .with_trigger("leave.requested"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("leave.requested", HashMap::new()).await.unwrap();
    let run_id = &run_ids[0];
    wait_for(&engine, run_id, RunStatus::WaitingOnApproval).await;
    engine
        .resume(run_id, ApprovalDecision::approve("user-7"))
        .await
        .unwrap();

    let err = engine
        .resume(run_id, ApprovalDecision::approve("user-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyTerminal(_)));

    // status untouched by the failed resume
    let run = engine.get_run_status(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_resume_on_running_run_is_invalid() {
    let mut handlers = ActionHandlers::new();
    handlers.register_fn("slow", |_vars: HashMap<String, serde_json::Value>| async move {
        sleep(Duration::from_millis(300)).await;
        Ok(HashMap::new())
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("slow", "Slow")
                .with_step(action_step("go", "slow"))
                .with_trigger("slow.start"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("slow.start", HashMap::new()).await.unwrap();
    let run_id = &run_ids[0];
    wait_for(&engine, run_id, RunStatus::Running).await;

    let err = engine
        .resume(run_id, ApprovalDecision::approve("user-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRunState { .. }));
}

#[tokio::test]
async fn test_concurrent_resume_exactly_one_wins() {
    let mut handlers = ActionHandlers::new();
    handlers.register_fn("slow", |_vars: HashMap<String, serde_json::Value>| async move {
        sleep(Duration::from_millis(200)).await;
        Ok(HashMap::new())
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("expense", "Expense approval")
                .with_step(approval_step("signoff", "hr-manager"))
                .with_step(action_step("book", "slow"))
                .with_trigger("expense.filed"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("expense.filed", HashMap::new()).await.unwrap();
    let run_id = run_ids[0].clone();
    wait_for(&engine, &run_id, RunStatus::WaitingOnApproval).await;

    let (first, second) = tokio::join!(
        engine.resume(&run_id, ApprovalDecision::approve("user-7")),
        engine.resume(&run_id, ApprovalDecision::approve("user-8")),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent resume must win");
    let loser = if first.is_err() { first } else { second };
    assert!(matches!(
        loser.unwrap_err(),
        EngineError::InvalidRunState { .. }
    ));

    wait_for(&engine, &run_id, RunStatus::Completed).await;
}

#[tokio::test]
async fn test_cancel_suspended_run() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("leave-request", "Leave request")
                .with_step(approval_step("manager-signoff", "hr-manager"))
                .with_trigger("leave.requested"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("leave.requested", HashMap::new()).await.unwrap();
    let run_id = &run_ids[0];
    wait_for(&engine, run_id, RunStatus::WaitingOnApproval).await;

    engine.cancel(run_id).await.unwrap();
    let run = engine.get_run_status(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);

    // the pending request is cleared and the run cannot come back
    assert!(engine.pending_approval(run_id).await.is_none());
    let err = engine
        .resume(run_id, ApprovalDecision::approve("user-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn test_cancel_terminal_run_fails() {
    let mut handlers = ActionHandlers::new();
    handlers.register_fn("noop", |_vars: HashMap<String, serde_json::Value>| async move {
        Ok(HashMap::new())
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("quick", "Quick")
                .with_step(action_step("go", "noop"))
                .with_trigger("quick.start"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("quick.start", HashMap::new()).await.unwrap();
    wait_for(&engine, &run_ids[0], RunStatus::Completed).await;

    let err = engine.cancel(&run_ids[0]).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn test_cancel_takes_effect_before_next_step() {
    let second_step_ran = Arc::new(AtomicU32::new(0));

    let mut handlers = ActionHandlers::new();
    handlers.register_fn("slow", |_vars: HashMap<String, serde_json::Value>| async move {
        sleep(Duration::from_millis(150)).await;
        Ok(HashMap::new())
    });
    let ran = Arc::clone(&second_step_ran);
    handlers.register_fn("after", move |_vars: HashMap<String, serde_json::Value>| {
        let ran = Arc::clone(&ran);
        async move {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::new())
        }
    });

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .action_handlers(handlers)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("two-phase", "Two phase")
                .with_step(action_step("first", "slow"))
                .with_step(action_step("second", "after"))
                .with_trigger("two.start"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("two.start", HashMap::new()).await.unwrap();
    let run_id = &run_ids[0];
    wait_for(&engine, run_id, RunStatus::Running).await;

    // cancel while the first step is in flight; it may finish, but the
    // second step must never start
    engine.cancel(run_id).await.unwrap();
    sleep(Duration::from_millis(400)).await;

    let run = engine.get_run_status(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(second_step_ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_notification_retries_then_succeeds() {
    let transport = Arc::new(RecordingTransport::failing(2));

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("reminder", "Reminder")
                .with_step(notification_step("ping", "reminder"))
                .with_trigger("reminder.due"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("reminder.due", HashMap::new()).await.unwrap();
    wait_for(&engine, &run_ids[0], RunStatus::Completed).await;

    assert_eq!(transport.sent().len(), 1);
    let records = engine.step_records(&run_ids[0]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StepStatus::Completed);
    assert_eq!(records[0].attempt, 3);
}

#[tokio::test]
async fn test_notification_retry_exhaustion_fails_run() {
    let transport = Arc::new(RecordingTransport::failing(10));

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("reminder", "Reminder")
                .with_step(notification_step("ping", "reminder"))
                .with_trigger("reminder.due"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("reminder.due", HashMap::new()).await.unwrap();
    let run = wait_for(&engine, &run_ids[0], RunStatus::Failed).await;

    assert!(run.last_error.unwrap().contains("after 3 attempts"));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_action_handler_fails_run_without_retry() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("misconfigured", "Misconfigured")
                .with_step(action_step("go", "doesNotExist"))
                .with_trigger("oops.start"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("oops.start", HashMap::new()).await.unwrap();
    let run = wait_for(&engine, &run_ids[0], RunStatus::Failed).await;
    assert!(run.last_error.unwrap().contains("unknown action handler"));

    let records = engine.step_records(&run_ids[0]).await.unwrap();
    assert_eq!(records[0].attempt, 1);
}

#[tokio::test]
async fn test_recover_skips_completed_steps() {
    let transport = Arc::new(RecordingTransport::default());
    let invocations = Arc::new(AtomicU32::new(0));

    let mut handlers = ActionHandlers::new();
    let counter = Arc::clone(&invocations);
    handlers.register_fn("finish", move |_vars: HashMap<String, serde_json::Value>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::new())
        }
    });

    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());

    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .action_handlers(handlers)
        .run_store(Arc::clone(&store))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("onboard", "Employee onboarding")
                .with_step(notification_step("welcome", "welcome"))
                .with_step(action_step("record", "finish"))
                .with_trigger("employee.hired"),
        )
        .await
        .unwrap();

    // Simulate a run that crashed after completing the first step but
    // before advancing: the record is durable, the status still Pending.
    let context = ExecutionContext::new("onboard", HashMap::new());
    let run = WorkflowRun::new(&context);
    let run_id = run.run_id.clone();
    store.insert_run(run, context).await.unwrap();
    store
        .record_step(StepRecord::new(&run_id, "welcome", StepStatus::Completed, 1))
        .await
        .unwrap();

    let resumed = engine.recover().await.unwrap();
    assert_eq!(resumed, vec![run_id.clone()]);

    wait_for(&engine, &run_id, RunStatus::Completed).await;

    // the already-completed notification step was not re-executed
    assert!(transport.sent().is_empty());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recover_leaves_suspended_runs_alone() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("leave-request", "Leave request")
                .with_step(approval_step("manager-signoff", "hr-manager"))
                .with_trigger("leave.requested"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("leave.requested", HashMap::new()).await.unwrap();
    wait_for(&engine, &run_ids[0], RunStatus::WaitingOnApproval).await;

    let resumed = engine.recover().await.unwrap();
    assert!(resumed.is_empty());
    let run = engine.get_run_status(&run_ids[0]).await.unwrap();
    assert_eq!(run.status, RunStatus::WaitingOnApproval);
}

#[tokio::test]
async fn test_unresolvable_approver_fails_run() {
    let engine = Engine::builder()
        .identity_provider(Arc::new(Directory))
        .notification_transport(Arc::new(RecordingTransport::default()))
        .settings(fast_settings())
        .build()
        .unwrap();

    engine
        .register_workflow(
            WorkflowDefinition::new("leave-request", "Leave request")
                .with_step(approval_step("signoff", "nonexistent-role"))
                .with_trigger("leave.requested"),
        )
        .await
        .unwrap();

    let run_ids = engine.trigger("leave.requested", HashMap::new()).await.unwrap();
    let run = wait_for(&engine, &run_ids[0], RunStatus::Failed).await;
    assert!(run.last_error.unwrap().contains("could not resolve approver"));
}
