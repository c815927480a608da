//! Minimal Twitch Helix client.
//!
//! Covers exactly what a category watcher needs: resolving a category name,
//! listing the live streams in that category and looking up streamer
//! profiles. Requests are authenticated with an app access token that is
//! fetched lazily and refreshed once on a 401, and transient failures are
//! retried with exponential backoff.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;

pub use client::{HelixClient, HelixClientConfig, create_client_builder, install_rustls_provider};
pub use error::{Result, TwitchApiError};
pub use models::{Category, LiveStream, StreamerProfile};
pub use retry::RetryPolicy;
