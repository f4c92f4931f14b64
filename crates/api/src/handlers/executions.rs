use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState};
use engine::{RunContext, TriggerKind, WorkflowExecution};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteWorkflowDto {
    #[serde(default)]
    pub context: RunContext,
    #[serde(default)]
    pub triggered_by: TriggerKind,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExecutionsQuery {
    pub workflow_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// Run the workflow synchronously and return the finalised record, whether
/// it succeeded or failed. An empty body runs with an empty context; a body
/// that does not decode is rejected before anything is written.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let payload = parse_execute_body(&body)?;
    let execution = state
        .service
        .execute_workflow(id, payload.context, payload.triggered_by)
        .await?;
    Ok(Json(execution))
}

fn parse_execute_body(body: &[u8]) -> Result<ExecuteWorkflowDto, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ExecuteWorkflowDto::default());
    }
    serde_json::from_slice(body)
}

pub async fn list(
    Query(query): Query<ListExecutionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkflowExecution>>, ApiError> {
    Ok(Json(state.service.list_executions(query.workflow_id, query.limit).await?))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    Ok(Json(state.service.get_execution(id).await?))
}
