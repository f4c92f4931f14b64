//! `WorkflowService`: the surface the rest of the application talks to.
//!
//! CRUD over workflows, on-demand execution, and read access to the
//! execution audit trail. Apart from validating definitions on the way in,
//! these are thin pass-throughs to the [`Store`].

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use db::{DbError, Store, models::WorkflowChanges};
use providers::Providers;

use crate::error::EngineError;
use crate::executor::{ExecutorConfig, WorkflowExecutor};
use crate::models::{
    RunContext, TriggerKind, Workflow, WorkflowDefinition, WorkflowExecution, WorkflowPatch,
};
use crate::validate::validate_steps;

/// Page size for `list_executions` when the caller gives none.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
/// Hard ceiling on any execution listing.
pub const MAX_LIST_LIMIT: i64 = 1000;

pub struct WorkflowService {
    store: Arc<dyn Store>,
    executor: WorkflowExecutor,
    default_list_limit: i64,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn Store>, providers: Providers, config: ExecutorConfig) -> Self {
        Self {
            executor: WorkflowExecutor::new(store.clone(), providers, config),
            store,
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_default_list_limit(mut self, limit: i64) -> Self {
        self.default_list_limit = limit.clamp(1, MAX_LIST_LIMIT);
        self
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// All workflows, newest first.
    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        self.store
            .list_workflows()
            .await?
            .into_iter()
            .map(|row| Workflow::try_from(row).map_err(EngineError::from))
            .collect()
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        let row = self.store.get_workflow(id).await.map_err(|e| workflow_lookup(e, id))?;
        Ok(Workflow::try_from(row)?)
    }

    #[instrument(skip_all, fields(name = %definition.name))]
    pub async fn create_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Workflow, EngineError> {
        validate_steps(&definition.steps)?;
        let row = self.store.create_workflow(definition.into_new_row()?).await?;
        info!(workflow_id = %row.id, "workflow created");
        Ok(Workflow::try_from(row)?)
    }

    /// Merge `patch` onto the stored workflow. Counters are never touched.
    #[instrument(skip(self, patch))]
    pub async fn update_workflow(
        &self,
        id: Uuid,
        patch: WorkflowPatch,
    ) -> Result<Workflow, EngineError> {
        let current = self.get_workflow(id).await?;
        let merged = patch.apply(&current);
        validate_steps(&merged.steps)?;

        let new_row = merged.into_new_row()?;
        let changes = WorkflowChanges {
            name: Some(new_row.name),
            definition: Some(new_row.definition),
            active: Some(new_row.active),
        };
        let row = self
            .store
            .update_workflow(id, changes)
            .await
            .map_err(|e| workflow_lookup(e, id))?;
        info!("workflow updated");
        Ok(Workflow::try_from(row)?)
    }

    /// Remove the definition. Its executions stay in the audit trail.
    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, id: Uuid) -> Result<(), EngineError> {
        self.store.delete_workflow(id).await.map_err(|e| workflow_lookup(e, id))?;
        info!("workflow deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    pub async fn execute_workflow(
        &self,
        id: Uuid,
        context: RunContext,
        triggered_by: TriggerKind,
    ) -> Result<WorkflowExecution, EngineError> {
        self.executor.execute(id, context, triggered_by).await
    }

    /// Most recently started first, capped at `limit` (or the default).
    pub async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let limit = limit.unwrap_or(self.default_list_limit).clamp(0, MAX_LIST_LIMIT);
        self.store
            .list_executions(workflow_id, limit)
            .await?
            .into_iter()
            .map(|row| WorkflowExecution::try_from(row).map_err(EngineError::from))
            .collect()
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let row = self.store.get_execution(id).await.map_err(|e| match e {
            DbError::NotFound => EngineError::ExecutionNotFound(id),
            other => other.into(),
        })?;
        Ok(WorkflowExecution::try_from(row)?)
    }
}

fn workflow_lookup(err: DbError, id: Uuid) -> EngineError {
    match err {
        DbError::NotFound => EngineError::WorkflowNotFound(id),
        other => other.into(),
    }
}
