//! `api` crate: HTTP REST API over the workflow service.
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   PATCH  /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   POST   /api/v1/workflows/{id}/execute
//!   GET    /api/v1/executions?workflowId=&limit=
//!   GET    /api/v1/executions/{id}
//!   GET    /healthz

pub mod handlers;

pub use handlers::{ApiError, AppState};

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use handlers::{executions, workflows};

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route(
            "/workflows/:id",
            get(workflows::get).patch(workflows::update).delete(workflows::delete),
        )
        .route("/workflows/:id/execute", post(executions::execute))
        .route("/executions", get(executions::list))
        .route("/executions/:id", get(executions::get));

    Router::new()
        .nest("/api/v1", api)
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state)).await
}
