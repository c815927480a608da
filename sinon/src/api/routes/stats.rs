//! Statistics routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::{DestinationStatsResponse, StatsResponse};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_stats))
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let destinations = state
        .reconciler
        .snapshot()
        .into_iter()
        .map(DestinationStatsResponse::from)
        .collect();

    Json(StatsResponse {
        status: state.control.status().to_string(),
        stats: state.reconciler.stats().snapshot(),
        destinations,
    })
}
