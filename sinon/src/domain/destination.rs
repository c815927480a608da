//! Notification destinations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one configured destination (the Discord guild id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Discord channel snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One independently configured target: a channel that receives
/// notifications for live streams in one Twitch category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    /// Category name, matched case-sensitively by Twitch.
    pub category: String,
    pub channel_id: ChannelId,
}

impl Destination {
    pub fn new(id: impl Into<String>, category: impl Into<String>, channel_id: u64) -> Self {
        Self {
            id: DestinationId::new(id),
            category: category.into(),
            channel_id: ChannelId(channel_id),
        }
    }
}
