//! Workflow execution repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowExecutionRow};

const COLUMNS: &str =
    "id, workflow_id, workflow_name, status, started_at, completed_at, document";

/// Insert a freshly started execution.
pub async fn insert_execution(pool: &PgPool, row: &WorkflowExecutionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, workflow_name, status, started_at, completed_at, document)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(&row.workflow_name)
    .bind(&row.status)
    .bind(row.started_at)
    .bind(row.completed_at)
    .bind(&row.document)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the mutable parts of an execution (status, completion, document).
pub async fn update_execution(pool: &PgPool, row: &WorkflowExecutionRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $2, completed_at = $3, document = $4
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(&row.status)
    .bind(row.completed_at)
    .bind(&row.document)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
    sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM workflow_executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Most recently started executions first, optionally for one workflow only.
/// Runs with the same start time come back latest-inserted first.
pub async fn list_executions(
    pool: &PgPool,
    workflow_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM workflow_executions
        WHERE ($1::uuid IS NULL OR workflow_id = $1)
        ORDER BY started_at DESC, seq DESC
        LIMIT $2
        "#
    ))
    .bind(workflow_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
