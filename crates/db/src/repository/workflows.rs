//! Workflow CRUD operations.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{NewWorkflow, WorkflowChanges, WorkflowRow},
};

const COLUMNS: &str =
    "id, name, definition, active, executions, last_executed, created_at, updated_at";

/// Insert a new workflow into the database.
///
/// `definition` must be a JSON object produced by serialising the domain
/// workflow from the `engine` crate.
pub async fn create_workflow(pool: &PgPool, new: &NewWorkflow) -> Result<WorkflowRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        INSERT INTO workflows (id, name, definition, active, executions, created_at, updated_at)
        VALUES ($1, $2, $3, $4, 0, $5, $5)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&new.name)
    .bind(&new.definition)
    .bind(new.active)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(&format!("SELECT {COLUMNS} FROM workflows WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Apply a partial update and bump `updated_at`.
pub async fn update_workflow(
    pool: &PgPool,
    id: Uuid,
    changes: &WorkflowChanges,
) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        UPDATE workflows
        SET name       = COALESCE($2, name),
            definition = COALESCE($3, definition),
            active     = COALESCE($4, active),
            updated_at = $5
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(changes.name.as_deref())
    .bind(changes.definition.as_ref())
    .bind(changes.active)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted. Execution rows are kept.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Count one completed run. The increment happens inside the UPDATE, so
/// concurrent runs of the same workflow never lose a count.
pub async fn record_workflow_run(
    pool: &PgPool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE workflows SET executions = executions + 1, last_executed = $2 WHERE id = $1",
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
