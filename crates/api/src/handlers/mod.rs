//! Request handlers, shared state, and the error-to-status mapping.

pub mod workflows;
pub mod executions;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use engine::{EngineError, WorkflowService};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
}

impl AppState {
    pub fn new(service: WorkflowService) -> Self {
        Self { service: Arc::new(service) }
    }
}

/// Errors rendered as `{ "error": "..." }` with a matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The request body could not be decoded.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Engine(EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::Engine(EngineError::WorkflowInactive(_)) => StatusCode::CONFLICT,
            Self::Engine(e) if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
