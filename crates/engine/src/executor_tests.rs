//! Integration tests for the workflow execution engine.
//!
//! These run the full service (orchestrator + dispatcher + store) against
//! `db::MemoryStore` and the recording mocks from `providers::mock`, so no
//! Postgres instance or real side effects are required.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{NewWorkflow, WorkflowChanges, WorkflowExecutionRow, WorkflowRow};
use db::{DbError, MemoryStore, Store};
use providers::mock::{MockBehaviour, MockHttpClient, MockProviders};
use providers::ProviderError;

use crate::condition::Condition;
use crate::dispatcher::CONDITION_RESULT_KEY;
use crate::models::{
    AwardPointsConfig, CallWebhookConfig, ConditionalConfig, CreateNotificationConfig,
    ErrorKind, ExecutionStatus, RunContext, SendEmailConfig, StepAction, StepStatus, TriggerKind,
    UpdateDataConfig, Workflow, WorkflowDefinition, WorkflowStep,
};
use crate::{EngineError, ExecutorConfig, MissingTargetPolicy, WorkflowService};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn service_with(mocks: &MockProviders, config: ExecutorConfig) -> WorkflowService {
    WorkflowService::new(Arc::new(MemoryStore::new()), mocks.providers(), config)
}

fn service(mocks: &MockProviders) -> WorkflowService {
    service_with(mocks, ExecutorConfig::default())
}

async fn create(svc: &WorkflowService, steps: Vec<WorkflowStep>) -> Workflow {
    svc.create_workflow(WorkflowDefinition::new("test-workflow", steps))
        .await
        .expect("valid definition")
}

fn ctx(value: Value) -> RunContext {
    value.as_object().cloned().unwrap_or_default()
}

fn update(id: &str, order: i64) -> WorkflowStep {
    WorkflowStep::new(
        id,
        order,
        StepAction::UpdateData(UpdateDataConfig {
            collection: "members".into(),
            document_id: Some(format!("doc-{id}")),
            fields: ctx(json!({ "touchedBy": id })),
        }),
    )
}

fn points(id: &str, order: i64, member_id: Option<&str>) -> WorkflowStep {
    WorkflowStep::new(
        id,
        order,
        StepAction::AwardPoints(AwardPointsConfig {
            member_id: member_id.map(str::to_owned),
            category: "events".into(),
            amount: 10,
            description: "attendance".into(),
            related_entity_id: None,
            related_entity_type: None,
        }),
    )
}

fn notify(id: &str, order: i64) -> WorkflowStep {
    WorkflowStep::new(
        id,
        order,
        StepAction::CreateNotification(CreateNotificationConfig {
            member_id: Some("m1".into()),
            title: "Thanks".into(),
            message: "for coming".into(),
            kind: "info".into(),
        }),
    )
}

fn webhook(id: &str, order: i64) -> WorkflowStep {
    WorkflowStep::new(
        id,
        order,
        StepAction::CallWebhook(CallWebhookConfig {
            url: "http://hooks.local/member-joined".into(),
            method: "POST".into(),
            headers: Default::default(),
            body: None,
        }),
    )
}

fn branch(id: &str, order: i64, cond: Condition, on_true: Option<&str>, on_false: Option<&str>) -> WorkflowStep {
    WorkflowStep::new(
        id,
        order,
        StepAction::Conditional(ConditionalConfig {
            condition: cond,
            on_true: on_true.map(str::to_owned),
            on_false: on_false.map(str::to_owned),
        }),
    )
}

fn step_ids(run: &crate::WorkflowExecution) -> Vec<&str> {
    run.executed_steps.iter().map(|s| s.step_id.as_str()).collect()
}

// ============================================================
// Ordering and preconditions
// ============================================================

#[tokio::test]
async fn steps_run_in_order_regardless_of_storage_order() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("third", 3), update("first", 1), update("second", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    assert_eq!(step_ids(&run), vec!["first", "second", "third"]);
    assert_eq!(
        run.executed_steps.iter().map(|s| s.step_order).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    let patched: Vec<String> = mocks.documents.calls.all().into_iter().map(|(_, id, _)| id).collect();
    assert_eq!(patched, vec!["doc-first", "doc-second", "doc-third"]);
}

#[tokio::test]
async fn unknown_workflow_fails_without_record() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let id = Uuid::new_v4();

    let err = svc.execute_workflow(id, RunContext::new(), TriggerKind::Manual).await.unwrap_err();

    assert!(matches!(err, EngineError::WorkflowNotFound(x) if x == id));
    assert!(svc.list_executions(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn inactive_workflow_fails_without_touching_steps() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let mut def = WorkflowDefinition::new("dormant", vec![update("a", 1)]);
    def.active = false;
    let wf = svc.create_workflow(def).await.unwrap();

    let err = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap_err();

    assert!(matches!(err, EngineError::WorkflowInactive(_)));
    assert_eq!(mocks.documents.calls.count(), 0);
    assert!(svc.list_executions(Some(wf.id), None).await.unwrap().is_empty());
    assert_eq!(svc.get_workflow(wf.id).await.unwrap().executions, 0);
}

// ============================================================
// Fatal and non-fatal failures
// ============================================================

#[tokio::test]
async fn fatal_ledger_error_stops_pipeline() {
    let mocks = MockProviders::default()
        .with_ledger(MockBehaviour::Fail(ProviderError::Permanent("ledger offline".into())));
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("one", 1), points("two", 2, None), update("three", 3)]).await;

    let run = svc
        .execute_workflow(wf.id, ctx(json!({ "memberId": "m1" })), TriggerKind::Event)
        .await
        .unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.executed_steps.len(), 2);
    assert_eq!(run.executed_steps[0].status, StepStatus::Success);
    assert_eq!(run.executed_steps[1].status, StepStatus::Failed);
    assert!(run.executed_steps[1].error.as_deref().unwrap().contains("ledger offline"));

    let error = run.error.as_ref().unwrap();
    assert_eq!(error.step_id, "two");
    assert_eq!(error.step_type, "award_points");
    assert_eq!(error.kind, ErrorKind::StepFailed);
    assert!(error.stack.as_deref().unwrap().contains("ledger offline"));

    // 'three' was never executed.
    assert_eq!(mocks.documents.calls.count(), 1);
    assert_eq!(run.triggered_by, TriggerKind::Event);
}

#[tokio::test]
async fn missing_member_is_skipped_by_default() {
    let mocks = MockProviders::default()
        .with_ledger(MockBehaviour::Fail(ProviderError::Permanent("should not be called".into())));
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("one", 1), points("two", 2, None), update("three", 3)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    assert_eq!(run.executed_steps[1].status, StepStatus::Skipped);
    assert_eq!(run.executed_steps.len(), 3);
    assert_eq!(mocks.ledger.calls.count(), 0);
}

#[tokio::test]
async fn missing_member_fails_under_strict_policy() {
    let mocks = MockProviders::default();
    let svc = service_with(
        &mocks,
        ExecutorConfig { missing_target: MissingTargetPolicy::Fail, ..Default::default() },
    );
    let wf = create(&svc, vec![update("one", 1), points("two", 2, None), update("three", 3)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(step_ids(&run), vec!["one", "two"]);
    let error = run.error.unwrap();
    assert_eq!(error.step_id, "two");
    assert_eq!(error.kind, ErrorKind::MissingTarget);
}

#[tokio::test]
async fn update_data_failure_is_fatal() {
    let mocks = MockProviders::default()
        .with_documents(MockBehaviour::Fail(ProviderError::Permanent("collection locked".into())));
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("flag", 1), points("reward", 2, Some("m1"))]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(step_ids(&run), vec!["flag"]);
    assert_eq!(run.executed_steps[0].status, StepStatus::Failed);

    let error = run.error.as_ref().unwrap();
    assert_eq!(error.step_id, "flag");
    assert_eq!(error.step_type, "update_data");
    assert_eq!(error.kind, ErrorKind::StepFailed);
    assert!(error.message.contains("collection locked"));
    assert_eq!(mocks.documents.calls.count(), 1);
    assert_eq!(mocks.ledger.calls.count(), 0);
}

#[tokio::test]
async fn fatal_notification_error_stops_pipeline() {
    let mocks = MockProviders::default()
        .with_notifications(MockBehaviour::Fail(ProviderError::Transient("queue full".into())));
    let svc = service(&mocks);
    let wf = create(&svc, vec![notify("n", 1), update("after", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(step_ids(&run), vec!["n"]);
    assert_eq!(mocks.documents.calls.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn webhook_failure_does_not_abort_run() {
    let mocks = MockProviders::default().with_http(MockHttpClient::failing("connection refused"));
    let svc = service(&mocks);
    let wf = create(&svc, vec![webhook("hook", 1), update("after", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Webhook).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    assert!(run.error.is_none());
    assert_eq!(step_ids(&run), vec!["hook", "after"]);
    assert_eq!(run.executed_steps[0].status, StepStatus::Success);
    assert!(run.executed_steps[0].error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(mocks.documents.calls.count(), 1);
}

#[tokio::test]
async fn email_failure_falls_back_and_continues() {
    let mocks = MockProviders::default()
        .with_mailer(MockBehaviour::Fail(ProviderError::Permanent("bounced".into())));
    mocks.members.insert("m1", Some("m1@club.org"));
    let svc = service(&mocks);
    let mail = WorkflowStep::new(
        "mail",
        1,
        StepAction::SendEmail(SendEmailConfig {
            recipient_id: Some("m1".into()),
            subject: "Welcome".into(),
            ..Default::default()
        }),
    );
    let wf = create(&svc, vec![mail, update("after", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    assert_eq!(mocks.notifications.calls.count(), 1);
    assert_eq!(run.executed_steps.len(), 2);
}

#[tokio::test]
async fn email_without_recipient_is_fatal() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let mail = WorkflowStep::new("mail", 1, StepAction::SendEmail(SendEmailConfig::default()));
    let wf = create(&svc, vec![mail, update("after", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.error.unwrap().message, "no recipient email specified");
}

#[tokio::test]
async fn unsupported_step_type_is_tolerated() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let sms = WorkflowStep::new(
        "sms",
        1,
        StepAction::Unsupported { step_type: "send_sms".into(), config: json!({}) },
    );
    let wf = create(&svc, vec![sms, update("after", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    assert_eq!(run.executed_steps[0].step_type, "send_sms");
}

// ============================================================
// Deadlines
// ============================================================

#[tokio::test(start_paused = true)]
async fn hanging_step_times_out_and_fails_run() {
    let mocks = MockProviders::default().with_ledger(MockBehaviour::Hang);
    let svc = service_with(
        &mocks,
        ExecutorConfig { step_timeout: Duration::from_secs(2), ..Default::default() },
    );
    let wf = create(&svc, vec![points("slow", 1, Some("m1")), update("after", 2)]).await;

    let run = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Schedule).await.unwrap();

    assert_eq!(run.status, ExecutionStatus::Failed);
    let error = run.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.step_id, "slow");
    assert_eq!(mocks.documents.calls.count(), 0);
}

// ============================================================
// Branching and guards
// ============================================================

#[tokio::test]
async fn conditional_jumps_over_steps() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let wf = create(
        &svc,
        vec![
            branch("check", 1, Condition::new("member.tier", "==", json!("gold")), Some("vip"), None),
            update("regular", 2),
            update("vip", 3),
        ],
    )
    .await;

    let run = svc
        .execute_workflow(wf.id, ctx(json!({ "member": { "tier": "gold" } })), TriggerKind::Manual)
        .await
        .unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    let statuses: Vec<StepStatus> = run.executed_steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Success, StepStatus::Skipped, StepStatus::Success]);
    assert_eq!(run.executed_steps[0].output.as_ref().unwrap()["result"], json!(true));
    let patched: Vec<String> = mocks.documents.calls.all().into_iter().map(|(_, id, _)| id).collect();
    assert_eq!(patched, vec!["doc-vip"]);
}

#[tokio::test]
async fn conditional_on_false_jumps_forward() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let wf = create(
        &svc,
        vec![
            branch("check", 1, Condition::new("member.tier", "==", json!("gold")), None, Some("standard")),
            update("lounge", 2),
            update("gift", 3),
            update("standard", 4),
            update("tail", 5),
        ],
    )
    .await;

    let run = svc
        .execute_workflow(wf.id, ctx(json!({ "member": { "tier": "silver" } })), TriggerKind::Manual)
        .await
        .unwrap();

    assert_eq!(run.status, ExecutionStatus::Success);
    assert_eq!(step_ids(&run), vec!["check", "lounge", "gift", "standard", "tail"]);
    let statuses: Vec<StepStatus> = run.executed_steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Success,
            StepStatus::Skipped,
            StepStatus::Skipped,
            StepStatus::Success,
            StepStatus::Success,
        ]
    );
    assert_eq!(run.executed_steps[0].output.as_ref().unwrap()["result"], json!(false));
    let patched: Vec<String> = mocks.documents.calls.all().into_iter().map(|(_, id, _)| id).collect();
    assert_eq!(patched, vec!["doc-standard", "doc-tail"]);
}

#[tokio::test]
async fn conditional_without_target_falls_through() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let gated = WorkflowStep {
        conditions: Some(Condition::new(CONDITION_RESULT_KEY, "==", json!(true))),
        ..update("gated", 2)
    };
    let wf = create(
        &svc,
        vec![branch("check", 1, Condition::new("score", ">", json!(100)), None, None), gated, update("tail", 3)],
    )
    .await;

    let run = svc
        .execute_workflow(wf.id, ctx(json!({ "score": 12 })), TriggerKind::Manual)
        .await
        .unwrap();

    let statuses: Vec<StepStatus> = run.executed_steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Success, StepStatus::Skipped, StepStatus::Success]);
    // The stored input bag is the caller's, not the mutated run context.
    assert!(!run.context.unwrap().contains_key(CONDITION_RESULT_KEY));
}

// ============================================================
// Audit trail and counters
// ============================================================

#[tokio::test]
async fn sequential_runs_are_recorded_and_counted() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("a", 1)]).await;

    let first = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();
    let second = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap();

    assert_ne!(first.id, second.id);
    let listed: Vec<Uuid> = svc
        .list_executions(Some(wf.id), None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert!(listed.contains(&first.id) && listed.contains(&second.id));

    let wf_after = svc.get_workflow(wf.id).await.unwrap();
    assert_eq!(wf_after.executions, wf.executions + 2);
    assert!(wf_after.last_executed.is_some());
}

#[tokio::test]
async fn list_limit_returns_most_recent() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("a", 1)]).await;

    let mut last = None;
    for _ in 0..3 {
        last = Some(svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap());
    }

    let listed = svc.list_executions(Some(wf.id), Some(1)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, last.unwrap().id);
}

#[tokio::test]
async fn finalised_record_is_persisted() {
    let mocks = MockProviders::default();
    let svc = service(&mocks);
    let wf = create(&svc, vec![update("a", 1), update("b", 2)]).await;

    let run = svc
        .execute_workflow(wf.id, ctx(json!({ "memberId": "m9" })), TriggerKind::Manual)
        .await
        .unwrap();
    let stored = svc.get_execution(run.id).await.unwrap();

    assert_eq!(stored, run);
    assert_eq!(stored.status, ExecutionStatus::Success);
    assert!(stored.completed_at.is_some() && stored.duration.is_some());
    assert_eq!(stored.context.unwrap()["memberId"], "m9");
}

#[tokio::test]
async fn concurrent_runs_do_not_lose_counter_updates() {
    let mocks = MockProviders::default();
    let svc = Arc::new(service(&mocks));
    let wf_id = create(&svc, vec![update("a", 1)]).await.id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.execute_workflow(wf_id, RunContext::new(), TriggerKind::Event).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(svc.get_workflow(wf_id).await.unwrap().executions, 8);
    assert_eq!(svc.list_executions(Some(wf_id), None).await.unwrap().len(), 8);
}

// ============================================================
// Persistence failures
// ============================================================

/// Delegates to `MemoryStore` but refuses to update execution rows.
struct FinalizeFailsStore {
    inner: MemoryStore,
}

#[async_trait]
impl Store for FinalizeFailsStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        self.inner.create_workflow(new).await
    }
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.inner.get_workflow(id).await
    }
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        self.inner.list_workflows().await
    }
    async fn update_workflow(&self, id: Uuid, changes: WorkflowChanges) -> Result<WorkflowRow, DbError> {
        self.inner.update_workflow(id, changes).await
    }
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        self.inner.delete_workflow(id).await
    }
    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        self.inner.record_workflow_run(id, at).await
    }
    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        self.inner.insert_execution(row).await
    }
    async fn update_execution(&self, _row: &WorkflowExecutionRow) -> Result<(), DbError> {
        Err(DbError::Sqlx(sqlx::Error::PoolClosed))
    }
    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
        self.inner.get_execution(id).await
    }
    async fn list_executions(&self, workflow_id: Option<Uuid>, limit: i64) -> Result<Vec<WorkflowExecutionRow>, DbError> {
        self.inner.list_executions(workflow_id, limit).await
    }
}

#[tokio::test]
async fn finalize_failure_propagates_and_leaves_record_running() {
    let mocks = MockProviders::default();
    let store = Arc::new(FinalizeFailsStore { inner: MemoryStore::new() });
    let svc = WorkflowService::new(store, mocks.providers(), ExecutorConfig::default());
    let wf = create(&svc, vec![update("a", 1)]).await;

    let err = svc.execute_workflow(wf.id, RunContext::new(), TriggerKind::Manual).await.unwrap_err();

    assert!(matches!(err, EngineError::Database(_)));
    let stuck = svc.list_executions(Some(wf.id), None).await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].status, ExecutionStatus::Running);
    assert_eq!(svc.get_workflow(wf.id).await.unwrap().executions, 0);
}
