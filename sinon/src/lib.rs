//! Sinon library crate.
//!
//! Announces live Twitch streams of a category in Discord channels and keeps
//! those announcements in sync with what is actually live.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod notification;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
