//! Polling control routes.

use axum::{Json, Router, extract::State, routing::post};

use crate::api::models::BotStatusResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pause", post(pause))
        .route("/resume", post(resume))
}

/// Stop running passes. In-flight cycles finish normally.
async fn pause(State(state): State<AppState>) -> Json<BotStatusResponse> {
    let changed = state.control.pause();
    Json(BotStatusResponse {
        status: state.control.status().to_string(),
        changed,
    })
}

/// Resume polling; a pass starts immediately.
async fn resume(State(state): State<AppState>) -> Json<BotStatusResponse> {
    let changed = state.control.resume();
    Json(BotStatusResponse {
        status: state.control.status().to_string(),
        changed,
    })
}
