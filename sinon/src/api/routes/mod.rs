//! API route modules.
//!
//! Organizes routes by resource type.

pub mod bot;
pub mod destinations;
pub mod health;
pub mod logging;
pub mod stats;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/stats", stats::router())
        .nest("/api/destinations", destinations::router())
        .nest("/api/bot", bot::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state)
}
