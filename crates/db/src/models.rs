//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` crate, which serialises them into the
//! JSON `definition` / `document` columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    /// JSON document holding description, trigger and steps.
    pub definition: serde_json::Value,
    pub active: bool,
    /// Number of completed runs; only ever bumped by `record_workflow_run`.
    pub executions: i64,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a workflow insert; id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub definition: serde_json::Value,
    pub active: bool,
}

/// Partial update of a workflow row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct WorkflowChanges {
    pub name: Option<String>,
    pub definition: Option<serde_json::Value>,
    pub active: Option<bool>,
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// A persisted workflow execution row.
///
/// `status`, `started_at` and `completed_at` are duplicated out of the
/// document so listings can filter and sort without parsing JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Full execution record, including every executed step.
    pub document: serde_json::Value,
}
