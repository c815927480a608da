//! Configuration.
//!
//! Two layers:
//! - [`AppConfig`]: process-level settings read once from the environment.
//! - [`SettingsStore`]: the per-guild destination settings file, re-read at
//!   the start of every reconcile pass.

mod app;
mod settings;

pub use app::{AppConfig, DEFAULT_CHECK_INTERVAL, MIN_CHECK_INTERVAL};
pub use settings::{GuildEntry, GuildSettings, Settings, SettingsStore, parse_snowflake};

use async_trait::async_trait;

use crate::Result;
use crate::domain::Destination;

/// Source of the currently configured destinations.
#[async_trait]
pub trait DestinationSource: Send + Sync {
    /// Return every valid destination. Invalid entries are skipped.
    async fn destinations(&self) -> Result<Vec<Destination>>;
}

/// Fixed destination list, mostly useful for tests and one-off runs.
#[async_trait]
impl DestinationSource for Vec<Destination> {
    async fn destinations(&self) -> Result<Vec<Destination>> {
        Ok(self.clone())
    }
}
