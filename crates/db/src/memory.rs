//! In-process [`Store`] for tests, the CLI `run` command, and deployments
//! without a database.
//!
//! Rows live behind one `tokio::sync::RwLock`; every operation takes the lock
//! once, so the run counter increment is atomic like its SQL counterpart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    DbError, Store,
    models::{NewWorkflow, WorkflowChanges, WorkflowExecutionRow, WorkflowRow},
};

#[derive(Debug, Default)]
struct Tables {
    // Both kept in insertion order; listings break timestamp ties with it.
    workflows: Vec<WorkflowRow>,
    executions: Vec<WorkflowExecutionRow>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        let now = Utc::now();
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            name: new.name,
            definition: new.definition,
            active: new.active,
            executions: 0,
            last_executed: None,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.workflows.push(row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.tables
            .read()
            .await
            .workflows
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        let mut rows: Vec<WorkflowRow> =
            self.tables.read().await.workflows.iter().rev().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_workflow(
        &self,
        id: Uuid,
        changes: WorkflowChanges,
    ) -> Result<WorkflowRow, DbError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(DbError::NotFound)?;

        if let Some(name) = changes.name {
            row.name = name;
        }
        if let Some(definition) = changes.definition {
            row.definition = definition;
        }
        if let Some(active) = changes.active {
            row.active = active;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let before = tables.workflows.len();
        tables.workflows.retain(|w| w.id != id);
        if tables.workflows.len() == before {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn record_workflow_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(DbError::NotFound)?;
        row.executions += 1;
        row.last_executed = Some(at);
        Ok(())
    }

    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        self.tables.write().await.executions.push(row.clone());
        Ok(())
    }

    async fn update_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .executions
            .iter_mut()
            .find(|e| e.id == row.id)
            .ok_or(DbError::NotFound)?;
        *existing = row.clone();
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
        self.tables
            .read()
            .await
            .executions
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_executions(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>, DbError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<WorkflowExecutionRow> = tables
            .executions
            .iter()
            .rev()
            .filter(|e| workflow_id.map_or(true, |id| e.workflow_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_workflow(name: &str) -> NewWorkflow {
        NewWorkflow { name: name.into(), definition: json!({ "steps": [] }), active: true }
    }

    fn execution(workflow_id: Uuid, started_at: DateTime<Utc>) -> WorkflowExecutionRow {
        WorkflowExecutionRow {
            id: Uuid::new_v4(),
            workflow_id,
            workflow_name: "wf".into(),
            status: "running".into(),
            started_at,
            completed_at: None,
            document: json!({}),
        }
    }

    #[tokio::test]
    async fn workflows_are_listed_newest_first() {
        let store = MemoryStore::new();
        let first = store.create_workflow(new_workflow("first")).await.unwrap();
        let second = store.create_workflow(new_workflow("second")).await.unwrap();

        let ids: Vec<Uuid> = store.list_workflows().await.unwrap().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn update_only_touches_given_fields() {
        let store = MemoryStore::new();
        let row = store.create_workflow(new_workflow("before")).await.unwrap();

        let updated = store
            .update_workflow(row.id, WorkflowChanges { active: Some(false), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(updated.name, "before");
        assert!(!updated.active);
        assert!(updated.updated_at >= row.updated_at);
    }

    #[tokio::test]
    async fn record_run_increments_counter() {
        let store = MemoryStore::new();
        let row = store.create_workflow(new_workflow("wf")).await.unwrap();
        let at = Utc::now();

        store.record_workflow_run(row.id, at).await.unwrap();
        store.record_workflow_run(row.id, at).await.unwrap();

        let row = store.get_workflow(row.id).await.unwrap();
        assert_eq!(row.executions, 2);
        assert_eq!(row.last_executed, Some(at));
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(store.get_workflow(Uuid::new_v4()).await, Err(DbError::NotFound)));
        assert!(matches!(store.delete_workflow(Uuid::new_v4()).await, Err(DbError::NotFound)));
        assert!(matches!(
            store.update_execution(&execution(Uuid::new_v4(), Utc::now())).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn executions_are_filtered_sorted_and_capped() {
        let store = MemoryStore::new();
        let wf_a = Uuid::new_v4();
        let wf_b = Uuid::new_v4();
        let t0 = Utc::now();

        let old = execution(wf_a, t0);
        let other = execution(wf_b, t0 + chrono::Duration::seconds(1));
        let new = execution(wf_a, t0 + chrono::Duration::seconds(2));
        for row in [&old, &other, &new] {
            store.insert_execution(row).await.unwrap();
        }

        let for_a = store.list_executions(Some(wf_a), 10).await.unwrap();
        assert_eq!(for_a.iter().map(|e| e.id).collect::<Vec<_>>(), vec![new.id, old.id]);

        let latest = store.list_executions(None, 1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, new.id);
    }

    #[tokio::test]
    async fn executions_with_equal_start_list_latest_inserted_first() {
        let store = MemoryStore::new();
        let wf = Uuid::new_v4();
        let at = Utc::now();

        let first = execution(wf, at);
        let second = execution(wf, at);
        let third = execution(wf, at);
        for row in [&first, &second, &third] {
            store.insert_execution(row).await.unwrap();
        }

        let all = store.list_executions(Some(wf), 10).await.unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![third.id, second.id, first.id]);

        let latest = store.list_executions(Some(wf), 1).await.unwrap();
        assert_eq!(latest[0].id, third.id);
    }
}
