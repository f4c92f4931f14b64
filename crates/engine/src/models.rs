//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow and an execution
//! look like in memory. They are serialised (camelCase) into the JSON
//! `definition` / `document` columns owned by the `db` crate.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use db::models::{NewWorkflow, WorkflowExecutionRow, WorkflowRow};

use crate::condition::Condition;

/// The run-time input bag handed to a workflow and threaded through its steps.
pub type RunContext = Map<String, Value>;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// What category of event starts a workflow. Also recorded on every execution
/// as `triggeredBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Event,
    Schedule,
    Webhook,
    Condition,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Event => "event",
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Condition => "condition",
        };
        f.write_str(s)
    }
}

/// Trigger descriptor. Firing on it is the caller's job; the engine only
/// stores the shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub config: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Step configuration, one struct per step type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendEmailConfig {
    #[serde(alias = "to")]
    pub recipient_email: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_ids: Vec<String>,
    pub subject: String,
    #[serde(alias = "body")]
    pub html: Option<String>,
    pub text: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardPointsConfig {
    /// Falls back to `memberId` in the run context.
    #[serde(default)]
    pub member_id: Option<String>,
    pub category: String,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub related_entity_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationConfig {
    /// Falls back to `memberId` in the run context.
    #[serde(default)]
    pub member_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "notificationType", alias = "type", default = "default_notification_kind")]
    pub kind: String,
}

fn default_notification_kind() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallWebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request body; the whole run context is sent when absent.
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_webhook_method() -> String {
    "POST".to_owned()
}

/// Patch `fields` onto one document of `collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataConfig {
    pub collection: String,
    /// Falls back to `documentId` in the run context.
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Evaluate a condition and optionally jump forward to another step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalConfig {
    #[serde(flatten)]
    pub condition: Condition,
    #[serde(default)]
    pub on_true: Option<String>,
    #[serde(default)]
    pub on_false: Option<String>,
}

/// What a step does. Each variant owns its typed configuration, so a
/// malformed config is rejected when the workflow is stored, not at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    SendEmail(SendEmailConfig),
    AwardPoints(AwardPointsConfig),
    CreateNotification(CreateNotificationConfig),
    CallWebhook(CallWebhookConfig),
    UpdateData(UpdateDataConfig),
    Conditional(ConditionalConfig),
    /// A step type this engine does not know; it runs as a logged no-op.
    Unsupported { step_type: String, config: Value },
}

impl StepAction {
    /// Build the typed action from the wire representation.
    pub fn from_parts(step_type: String, config: Value) -> Result<Self, serde_json::Error> {
        let config = if config.is_null() { Value::Object(Map::new()) } else { config };
        Ok(match step_type.as_str() {
            "send_email" => Self::SendEmail(serde_json::from_value(config)?),
            "award_points" => Self::AwardPoints(serde_json::from_value(config)?),
            "create_notification" => Self::CreateNotification(serde_json::from_value(config)?),
            "call_webhook" => Self::CallWebhook(serde_json::from_value(config)?),
            "update_data" => Self::UpdateData(serde_json::from_value(config)?),
            "conditional" => Self::Conditional(serde_json::from_value(config)?),
            _ => Self::Unsupported { step_type, config },
        })
    }

    pub fn step_type(&self) -> &str {
        match self {
            Self::SendEmail(_) => "send_email",
            Self::AwardPoints(_) => "award_points",
            Self::CreateNotification(_) => "create_notification",
            Self::CallWebhook(_) => "call_webhook",
            Self::UpdateData(_) => "update_data",
            Self::Conditional(_) => "conditional",
            Self::Unsupported { step_type, .. } => step_type,
        }
    }

    fn config_value(&self) -> Value {
        let value = match self {
            Self::SendEmail(c) => serde_json::to_value(c),
            Self::AwardPoints(c) => serde_json::to_value(c),
            Self::CreateNotification(c) => serde_json::to_value(c),
            Self::CallWebhook(c) => serde_json::to_value(c),
            Self::UpdateData(c) => serde_json::to_value(c),
            Self::Conditional(c) => serde_json::to_value(c),
            Self::Unsupported { config, .. } => Ok(config.clone()),
        };
        // Plain structs with string keys always serialise.
        value.unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// One typed unit of work, executed in ascending `order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct WorkflowStep {
    /// Unique within the workflow; branch targets refer to it.
    pub id: String,
    pub order: i64,
    pub action: StepAction,
    /// Guard evaluated before dispatch; a false guard skips the step.
    pub conditions: Option<Condition>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, order: i64, action: StepAction) -> Self {
        Self { id: id.into(), order, action, conditions: None }
    }

    pub fn step_type(&self) -> &str {
        self.action.step_type()
    }
}

/// Wire shape of a step: `{ id, type, order, config, conditions? }`.
#[derive(Serialize, Deserialize)]
struct RawStep {
    id: String,
    #[serde(rename = "type")]
    step_type: String,
    order: i64,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conditions: Option<Condition>,
}

impl TryFrom<RawStep> for WorkflowStep {
    type Error = serde_json::Error;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        Ok(Self {
            action: StepAction::from_parts(raw.step_type, raw.config)?,
            id: raw.id,
            order: raw.order,
            conditions: raw.conditions,
        })
    }
}

impl From<WorkflowStep> for RawStep {
    fn from(step: WorkflowStep) -> Self {
        Self {
            step_type: step.step_type().to_owned(),
            config: step.action.config_value(),
            id: step.id,
            order: step.order,
            conditions: step.conditions,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete, stored workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger: Trigger,
    pub steps: Vec<WorkflowStep>,
    pub active: bool,
    pub executions: i64,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Steps in execution order.
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// The JSON document stored in the `definition` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionDocument {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    trigger: Trigger,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = serde_json::Error;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let doc: DefinitionDocument = serde_json::from_value(row.definition)?;
        Ok(Self {
            id: row.id,
            name: row.name,
            description: doc.description,
            trigger: doc.trigger,
            steps: doc.steps,
            active: row.active,
            executions: row.executions,
            last_executed: row.last_executed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn definition_value(
    description: Option<String>,
    trigger: Trigger,
    steps: Vec<WorkflowStep>,
) -> Result<Value, serde_json::Error> {
    serde_json::to_value(DefinitionDocument { description, trigger, steps })
}

/// Operator input for `create_workflow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: None,
            trigger: Trigger::default(),
            steps,
            active: true,
        }
    }

    pub fn into_new_row(self) -> Result<NewWorkflow, serde_json::Error> {
        Ok(NewWorkflow {
            definition: definition_value(self.description, self.trigger, self.steps)?,
            name: self.name,
            active: self.active,
        })
    }
}

/// Operator input for `update_workflow`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    /// `null` clears the description; an absent key keeps it.
    #[serde(deserialize_with = "present_or_null", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub trigger: Option<Trigger>,
    pub steps: Option<Vec<WorkflowStep>>,
    pub active: Option<bool>,
}

impl WorkflowPatch {
    /// Apply the patch on top of `current`, returning the merged definition.
    pub fn apply(self, current: &Workflow) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            description: self.description.unwrap_or_else(|| current.description.clone()),
            trigger: self.trigger.unwrap_or_else(|| current.trigger.clone()),
            steps: self.steps.unwrap_or_else(|| current.steps.clone()),
            active: self.active.unwrap_or(current.active),
        }
    }
}

/// A key that is present maps to `Some`, including an explicit `null`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    /// Nothing was done: missing target, false guard, or jumped over.
    Skipped,
}

/// One entry of an execution's append-only step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionStep {
    pub step_id: String,
    pub step_type: String,
    pub step_order: i64,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds.
    pub duration: Option<i64>,
    /// Set on failure, and on success when a non-fatal error was absorbed.
    pub error: Option<String>,
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StepFailed,
    MissingTarget,
    Timeout,
}

/// The fatal error that ended a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub message: String,
    pub step_id: String,
    pub step_type: String,
    pub kind: ErrorKind,
    /// Error source chain, outermost first, one cause per line.
    pub stack: Option<String>,
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Snapshot taken at start; survives renames and deletion.
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds.
    pub duration: Option<i64>,
    pub triggered_by: TriggerKind,
    pub executed_steps: Vec<WorkflowExecutionStep>,
    pub error: Option<ExecutionError>,
    /// The input bag passed in at invocation.
    pub context: Option<RunContext>,
}

impl WorkflowExecution {
    /// A fresh `running` record for `workflow`.
    pub fn start(
        workflow: &Workflow,
        triggered_by: TriggerKind,
        context: RunContext,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            duration: None,
            triggered_by,
            executed_steps: Vec::new(),
            error: None,
            context: Some(context),
        }
    }

    /// Move to the terminal state implied by the captured error.
    pub fn finish(&mut self, completed_at: DateTime<Utc>, duration_ms: i64) {
        self.status = if self.error.is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        self.completed_at = Some(completed_at);
        self.duration = Some(duration_ms);
    }

    pub fn to_row(&self) -> Result<WorkflowExecutionRow, serde_json::Error> {
        Ok(WorkflowExecutionRow {
            id: self.id,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name.clone(),
            status: self.status.as_str().to_owned(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            document: serde_json::to_value(self)?,
        })
    }
}

impl TryFrom<WorkflowExecutionRow> for WorkflowExecution {
    type Error = serde_json::Error;

    fn try_from(row: WorkflowExecutionRow) -> Result<Self, Self::Error> {
        serde_json::from_value(row.document)
    }
}
