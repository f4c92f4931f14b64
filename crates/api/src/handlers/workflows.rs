use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::{ApiError, AppState};
use engine::{Workflow, WorkflowDefinition, WorkflowPatch};

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.service.list_workflows().await?))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.service.get_workflow(id).await?))
}

/// Step configs are typed, so a malformed definition is already rejected
/// by the `Json` extractor; step ordering and branches are checked here.
pub async fn create(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = state.service.create_workflow(definition).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn update(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(patch): Json<WorkflowPatch>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.service.update_workflow(id, patch).await?))
}

pub async fn delete(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_workflow(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
