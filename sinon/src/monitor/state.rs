//! Per-destination reconciliation state.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use twitch_api::StreamerProfile;

use super::reconciler::ReconcileOutcome;
use crate::domain::{ChannelId, DestinationId};
use crate::notification::MessageHandle;

/// A live stream that has a notification posted for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    pub message: MessageHandle,
    /// Highest viewer count seen during this broadcast. Never decreases.
    pub max_viewers: u64,
    /// Captured when the notification was first posted.
    pub profile: StreamerProfile,
}

impl TrackedEntry {
    /// Fold in the latest viewer count and return the new maximum.
    pub fn observe_viewers(&mut self, viewers: u64) -> u64 {
        self.max_viewers = self.max_viewers.max(viewers);
        self.max_viewers
    }
}

/// The "no streams" sentinel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoStreamsMarker {
    pub message: MessageHandle,
    /// Category the sentinel was posted for.
    ///
    /// A sentinel naming a category other than the destination's current
    /// one is stale: an empty cycle deletes it and posts a fresh one,
    /// instead of keeping the first sentinel for the whole quiet period.
    pub category: String,
}

/// Everything the reconciler remembers about one destination.
///
/// Either there are tracked entries and no marker, or a marker and no
/// entries.
#[derive(Debug, Default)]
pub struct DestinationState {
    /// Tracked entries keyed by stream id.
    pub entries: HashMap<String, TrackedEntry>,
    pub no_streams: Option<NoStreamsMarker>,
    /// Categories a "not found" notice was already posted for.
    pub invalid_categories: HashSet<String>,
    /// Set once the missing channel has been reported.
    pub channel_missing_warned: bool,
}

impl DestinationState {
    /// Every message this state refers to.
    pub fn messages(&self) -> impl Iterator<Item = &MessageHandle> {
        self.entries
            .values()
            .map(|e| &e.message)
            .chain(self.no_streams.as_ref().map(|m| &m.message))
    }

    /// Whether any tracked message lives outside `channel`.
    pub fn has_messages_outside(&self, channel: ChannelId) -> bool {
        self.messages().any(|m| m.channel_id != channel)
    }

    pub fn summarize(
        &self,
        destination: &DestinationId,
        category: &str,
        outcome: &ReconcileOutcome,
    ) -> DestinationSummary {
        let mut stream_ids: Vec<String> = self.entries.keys().cloned().collect();
        stream_ids.sort();
        DestinationSummary {
            destination: destination.clone(),
            category: category.to_string(),
            tracked_streams: stream_ids,
            no_streams_marker: self.no_streams.is_some(),
            category_not_found: self.invalid_categories.contains(category),
            channel_missing: self.channel_missing_warned,
            last_outcome: Some(outcome.clone()),
            last_cycle_at: Some(Utc::now()),
        }
    }
}

/// Read-only view of a destination for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationSummary {
    pub destination: DestinationId,
    pub category: String,
    pub tracked_streams: Vec<String>,
    pub no_streams_marker: bool,
    pub category_not_found: bool,
    pub channel_missing: bool,
    pub last_outcome: Option<ReconcileOutcome>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}
