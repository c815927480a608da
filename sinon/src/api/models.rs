//! API request and response models.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::parse_snowflake;
use crate::domain::Destination;
use crate::metrics::BotStats;
use crate::monitor::{DestinationSummary, ReconcileOutcome};

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Stats
// ============================================================================

/// Response of `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// `running` or `paused`.
    pub status: String,
    #[serde(flatten)]
    pub stats: BotStats,
    pub destinations: Vec<DestinationStatsResponse>,
}

/// Per-destination part of [`StatsResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct DestinationStatsResponse {
    pub destination: String,
    pub category: String,
    pub tracked_streams: usize,
    pub no_streams_marker: bool,
    pub category_not_found: bool,
    pub channel_missing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<ReconcileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<DestinationSummary> for DestinationStatsResponse {
    fn from(summary: DestinationSummary) -> Self {
        Self {
            destination: summary.destination.to_string(),
            category: summary.category,
            tracked_streams: summary.tracked_streams.len(),
            no_streams_marker: summary.no_streams_marker,
            category_not_found: summary.category_not_found,
            channel_missing: summary.channel_missing,
            last_outcome: summary.last_outcome,
            last_cycle_at: summary.last_cycle_at,
        }
    }
}

// ============================================================================
// Destinations
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DestinationResponse {
    pub id: String,
    pub category: String,
    pub channel_id: String,
}

impl From<Destination> for DestinationResponse {
    fn from(destination: Destination) -> Self {
        Self {
            id: destination.id.to_string(),
            category: destination.category,
            // Snowflakes exceed the precision of JavaScript numbers.
            channel_id: destination.channel_id.to_string(),
        }
    }
}

/// Body of `PUT /api/destinations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDestinationRequest {
    /// Channel id as a number, a numeric string or a `<#id>` mention.
    #[serde(deserialize_with = "deserialize_channel")]
    pub channel_id: u64,
    pub category: String,
}

fn deserialize_channel<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => parse_snowflake(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid channel id: {text}"))),
    }
}

/// Response of `POST /api/destinations/{id}/reconcile`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResponse {
    pub destination: String,
    pub outcome: ReconcileOutcome,
}

// ============================================================================
// Bot control
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BotStatusResponse {
    pub status: String,
    /// Whether the request changed anything.
    pub changed: bool,
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}
