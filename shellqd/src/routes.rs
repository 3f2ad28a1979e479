//! HTTP route handlers for the control API.

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;
use shellq::active::ActiveJob;
use tracing::info;

use crate::state::AppState;

/// Build the control router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/cancel", post(cancel))
        .route("/health", get(health))
        .route("/status", get(status))
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// POST /cancel - flag the running job for cancellation. Always 200, even
/// when nothing is running.
async fn cancel(State(state): State<AppState>) -> Json<MessageResponse> {
    state.cancel.signal();
    info!(active = ?state.active.current().map(|a| a.job.to_string()), "cancellation requested");
    Json(MessageResponse {
        message: "Cancellation signal sent",
    })
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct StatusResponse {
    active: Option<ActiveJob>,
}

/// GET /status - the job currently running, if any.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active: state.active.current(),
    })
}
