use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::actions::ActionRequest;
use crate::error::CoreError;
use crate::pipeline::PipelineCore;

#[derive(Clone)]
pub struct AppState {
    core: Arc<PipelineCore>,
}

pub fn router(core: Arc<PipelineCore>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/actions", post(run_action))
        .layer(CorsLayer::very_permissive())
        .with_state(AppState { core })
}

async fn run_action(
    State(state): State<AppState>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(rej) => {
            return CoreError::validation("INVALID_REQUEST", rej.body_text()).into_response()
        }
    };
    let (status, envelope) = state.core.dispatch_with_status(req).await;
    (status, Json(envelope)).into_response()
}
