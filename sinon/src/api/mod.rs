//! Dashboard REST API.
//!
//! Read-only views of the reconciler plus a few control endpoints:
//! - Health and statistics
//! - Destination configuration and on-demand reconciles
//! - Pause/resume of the polling loop
//! - Runtime log filter

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::{ApiServer, ApiServerConfig, AppState};
