//! Destination routes.
//!
//! Destinations live in the settings file; changes made here are picked up
//! by the next pass.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{DestinationResponse, ReconcileResponse, UpdateDestinationRequest};
use crate::api::server::AppState;
use crate::monitor::{ReconcileOutcome, SkipReason};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_destinations))
        .route("/{id}", put(update_destination).delete(delete_destination))
        .route("/{id}/reconcile", post(reconcile_destination))
}

/// Valid destinations currently in the settings file.
async fn list_destinations(State(state): State<AppState>) -> Json<Vec<DestinationResponse>> {
    let destinations = state
        .settings
        .load()
        .await
        .destinations()
        .into_iter()
        .map(DestinationResponse::from)
        .collect();
    Json(destinations)
}

async fn update_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDestinationRequest>,
) -> ApiResult<Json<DestinationResponse>> {
    let destination = state
        .settings
        .set_destination(&id, request.channel_id, &request.category)
        .await?;
    info!(
        destination = %destination.id,
        category = %destination.category,
        channel = %destination.channel_id,
        "Destination configured"
    );
    Ok(Json(destination.into()))
}

async fn delete_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if !state.settings.remove_destination(&id).await? {
        return Err(ApiError::not_found(format!("Destination '{id}' is not configured")));
    }
    info!(destination = %id, "Destination removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Run a cycle for one destination right away.
async fn reconcile_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReconcileResponse>> {
    let destination = state
        .settings
        .load()
        .await
        .destinations()
        .into_iter()
        .find(|d| d.id.as_str() == id)
        .ok_or_else(|| ApiError::not_found(format!("Destination '{id}' is not configured")))?;

    let outcome = state.reconciler.reconcile_once(&destination).await;
    if outcome == ReconcileOutcome::Skipped(SkipReason::Busy) {
        return Err(ApiError::conflict(format!(
            "A cycle for destination '{id}' is already running"
        )));
    }

    Ok(Json(ReconcileResponse {
        destination: id,
        outcome,
    }))
}
