//! The `Store` trait: everything the engine needs from persistence.
//!
//! Two collections, workflows and executions. Implementations assign ids and
//! timestamps for workflows, keep execution rows forever, and must make
//! [`Store::record_workflow_run`] an atomic increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    DbError, DbPool,
    models::{NewWorkflow, WorkflowChanges, WorkflowExecutionRow, WorkflowRow},
    repository::{executions, workflows},
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError>;

    /// `DbError::NotFound` when the id is unknown.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Newest first.
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError>;

    async fn update_workflow(
        &self,
        id: Uuid,
        changes: WorkflowChanges,
    ) -> Result<WorkflowRow, DbError>;

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError>;

    /// Atomically add one to `executions` and set `last_executed`.
    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError>;

    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError>;

    async fn update_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError>;

    /// Most recently started first, at most `limit` rows.
    async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>, DbError>;
}

/// Postgres-backed [`Store`], delegating to the repository functions.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        workflows::create_workflow(&self.pool, &new).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_workflows(&self.pool).await
    }

    async fn update_workflow(
        &self,
        id: Uuid,
        changes: WorkflowChanges,
    ) -> Result<WorkflowRow, DbError> {
        workflows::update_workflow(&self.pool, id, &changes).await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        workflows::delete_workflow(&self.pool, id).await
    }

    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        workflows::record_workflow_run(&self.pool, id, at).await
    }

    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        executions::insert_execution(&self.pool, row).await
    }

    async fn update_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        executions::update_execution(&self.pool, row).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>, DbError> {
        executions::list_executions(&self.pool, workflow_id, limit).await
    }
}
