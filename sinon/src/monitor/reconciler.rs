//! Poll, diff and apply.
//!
//! One cycle per destination:
//!
//! 0. Resolve the target channel.
//! 1. Resolve the category; post a one-time notice if it does not exist.
//! 2. Fetch the live set. Fetch failures leave everything untouched.
//! 3. With nothing live, retract every notification and post a single
//!    "no streams" sentinel.
//! 4. Otherwise retract the sentinel, delete notifications of streams that
//!    ended, then post or refresh one notification per live stream.
//!
//! Cycles for the same destination never overlap; a cycle that finds the
//! previous one still running is skipped.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use twitch_api::LiveStream;

use super::source::StreamSource;
use super::state::{DestinationState, DestinationSummary, NoStreamsMarker, TrackedEntry};
use crate::domain::{Destination, DestinationId};
use crate::metrics::StatsCollector;
use crate::notification::{
    ChannelHandle, DeliveryError, EmbedRenderer, MessageHandle, NotificationChannel,
};

/// Why a cycle did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The previous cycle for this destination is still running.
    Busy,
    /// The channel was deleted or is no longer visible to the bot.
    ChannelMissing,
    /// The channel could not be looked up right now.
    ChannelUnavailable,
    /// Twitch did not answer the category lookup.
    CategoryLookupFailed,
    /// Twitch did not answer the live stream query.
    StreamFetchFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::ChannelMissing => "channel_missing",
            Self::ChannelUnavailable => "channel_unavailable",
            Self::CategoryLookupFailed => "category_lookup_failed",
            Self::StreamFetchFailed => "stream_fetch_failed",
        }
    }
}

/// Side effects of a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub live_streams: usize,
    pub sent: usize,
    pub edited: usize,
    pub deleted: usize,
    pub failed: usize,
    /// The configured category does not exist on Twitch.
    pub category_not_found: bool,
}

/// Result of one destination cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
}

impl ReconcileOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

#[derive(Debug, Default)]
struct DestinationSlot {
    state: Mutex<DestinationState>,
    summary: RwLock<Option<DestinationSummary>>,
}

/// Reconciles the live streams of each destination's category with the
/// notifications posted in its channel.
pub struct StreamReconciler {
    source: Arc<dyn StreamSource>,
    channel: Arc<dyn NotificationChannel>,
    renderer: EmbedRenderer,
    stats: Arc<StatsCollector>,
    slots: DashMap<DestinationId, Arc<DestinationSlot>>,
}

impl StreamReconciler {
    pub fn new(
        source: Arc<dyn StreamSource>,
        channel: Arc<dyn NotificationChannel>,
        renderer: EmbedRenderer,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            source,
            channel,
            renderer,
            stats,
            slots: DashMap::new(),
        }
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn channel(&self) -> &Arc<dyn NotificationChannel> {
        &self.channel
    }

    fn slot(&self, id: &DestinationId) -> Arc<DestinationSlot> {
        Arc::clone(self.slots.entry(id.clone()).or_default().value())
    }

    /// Run one cycle for `destination`.
    ///
    /// Never fails: every problem is logged and reflected in the outcome.
    pub async fn reconcile_once(&self, destination: &Destination) -> ReconcileOutcome {
        let slot = self.slot(&destination.id);

        let outcome = match slot.state.try_lock() {
            Ok(mut state) => {
                let outcome = self.run_cycle(destination, &mut state).await;
                *slot.summary.write() =
                    Some(state.summarize(&destination.id, &destination.category, &outcome));
                outcome
            }
            Err(_) => {
                debug!(destination = %destination.id, "Previous cycle still running, skipping");
                ReconcileOutcome::Skipped(SkipReason::Busy)
            }
        };

        self.stats.record_outcome(&outcome);
        outcome
    }

    /// Run one cycle for every destination concurrently.
    ///
    /// State of destinations that are no longer configured is dropped first.
    pub async fn reconcile_all(
        self: &Arc<Self>,
        destinations: Vec<Destination>,
    ) -> Vec<(DestinationId, ReconcileOutcome)> {
        self.prune(&destinations);

        let mut tasks = JoinSet::new();
        for destination in destinations {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = this.reconcile_once(&destination).await;
                (destination.id, outcome)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Reconcile task failed"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));

        self.stats.record_pass();
        results
    }

    /// Drop state of destinations not in `destinations`.
    fn prune(&self, destinations: &[Destination]) {
        let keep: HashSet<&DestinationId> = destinations.iter().map(|d| &d.id).collect();
        self.slots.retain(|id, _| {
            let retained = keep.contains(id);
            if !retained {
                info!(destination = %id, "Destination removed, dropping its state");
            }
            retained
        });
    }

    /// Latest summary of every known destination, ordered by id.
    pub fn snapshot(&self) -> Vec<DestinationSummary> {
        let mut summaries: Vec<DestinationSummary> = self
            .slots
            .iter()
            .filter_map(|slot| slot.value().summary.read().clone())
            .collect();
        summaries.sort_by(|a, b| a.destination.cmp(&b.destination));
        summaries
    }

    async fn run_cycle(
        &self,
        destination: &Destination,
        state: &mut DestinationState,
    ) -> ReconcileOutcome {
        let id = &destination.id;
        let category = destination.category.as_str();
        let mut report = CycleReport::default();

        let channel = match self.channel.resolve_channel(destination.channel_id).await {
            Ok(channel) => {
                if state.channel_missing_warned {
                    info!(
                        destination = %id,
                        channel = %destination.channel_id,
                        "Channel is available again"
                    );
                    state.channel_missing_warned = false;
                }
                channel
            }
            Err(e) if e.is_terminal() => {
                if !state.channel_missing_warned {
                    warn!(
                        destination = %id,
                        channel = %destination.channel_id,
                        error = %e,
                        "Notification channel is missing or inaccessible"
                    );
                    state.channel_missing_warned = true;
                }
                return ReconcileOutcome::Skipped(SkipReason::ChannelMissing);
            }
            Err(e) => {
                debug!(destination = %id, error = %e, "Could not resolve channel");
                return ReconcileOutcome::Skipped(SkipReason::ChannelUnavailable);
            }
        };

        if state.has_messages_outside(channel.channel_id) {
            self.retract_relocated(destination, state, &channel, &mut report).await;
        }

        // Only the current category can have an outstanding notice.
        state.invalid_categories.retain(|c| c == category);

        let category_id = match self.source.resolve_category(category).await {
            Ok(Some(category_id)) => category_id,
            Ok(None) => {
                report.category_not_found = true;
                if !state.invalid_categories.contains(category) {
                    warn!(destination = %id, category, "Twitch category not found");
                    let notice = self.renderer.category_not_found(category);
                    match self.channel.send(&channel, &notice).await {
                        Ok(_) => {
                            report.sent += 1;
                            state.invalid_categories.insert(category.to_string());
                        }
                        Err(e) => {
                            report.failed += 1;
                            warn!(
                                destination = %id,
                                category,
                                error = %e,
                                "Failed to post category notice"
                            );
                        }
                    }
                }
                return ReconcileOutcome::Completed(report);
            }
            Err(e) => {
                debug!(
                    destination = %id,
                    category,
                    error = %e,
                    "Category lookup failed, skipping cycle"
                );
                return ReconcileOutcome::Skipped(SkipReason::CategoryLookupFailed);
            }
        };

        state.invalid_categories.remove(category);

        let streams = match self.source.live_streams(&category_id).await {
            Ok(streams) => streams,
            Err(e) => {
                debug!(
                    destination = %id,
                    category,
                    error = %e,
                    "Stream fetch failed, skipping cycle"
                );
                return ReconcileOutcome::Skipped(SkipReason::StreamFetchFailed);
            }
        };
        report.live_streams = streams.len();

        if streams.is_empty() {
            self.apply_empty(destination, state, &channel, &mut report).await;
        } else {
            self.apply_live(destination, state, &channel, &streams, &mut report).await;
        }

        debug!(
            destination = %id,
            category,
            live = report.live_streams,
            sent = report.sent,
            edited = report.edited,
            deleted = report.deleted,
            failed = report.failed,
            "Cycle completed"
        );
        ReconcileOutcome::Completed(report)
    }

    /// Nothing is live: retract every notification, keep one sentinel.
    async fn apply_empty(
        &self,
        destination: &Destination,
        state: &mut DestinationState,
        channel: &ChannelHandle,
        report: &mut CycleReport,
    ) {
        let ended: Vec<(String, TrackedEntry)> = state.entries.drain().collect();
        for (stream_id, entry) in ended {
            self.retract(destination, &entry.message, &stream_id, report).await;
        }

        if let Some(marker) = &state.no_streams {
            if marker.category == destination.category {
                return;
            }
            // Posted for the previous category.
            let stale = marker.message;
            state.no_streams = None;
            self.retract(destination, &stale, "no-streams", report).await;
        }

        let notice = self.renderer.no_streams(&destination.category);
        match self.channel.send(channel, &notice).await {
            Ok(message) => {
                report.sent += 1;
                state.no_streams = Some(NoStreamsMarker {
                    message,
                    category: destination.category.clone(),
                });
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    destination = %destination.id,
                    error = %e,
                    "Failed to post no-streams notice"
                );
            }
        }
    }

    /// Streams are live: retract the sentinel and ended streams, then post
    /// or refresh.
    async fn apply_live(
        &self,
        destination: &Destination,
        state: &mut DestinationState,
        channel: &ChannelHandle,
        streams: &[LiveStream],
        report: &mut CycleReport,
    ) {
        if let Some(marker) = state.no_streams.take() {
            self.retract(destination, &marker.message, "no-streams", report).await;
        }

        let live: HashSet<&str> = streams.iter().map(|s| s.id.as_str()).collect();
        let ended: Vec<String> = state
            .entries
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for stream_id in ended {
            if let Some(entry) = state.entries.remove(&stream_id) {
                info!(destination = %destination.id, stream_id = %stream_id, "Stream ended");
                self.retract(destination, &entry.message, &stream_id, report).await;
            }
        }

        let mut seen = HashSet::with_capacity(streams.len());
        for stream in streams {
            if !seen.insert(stream.id.as_str()) {
                continue;
            }
            if state.entries.contains_key(&stream.id) {
                self.refresh(destination, state, stream, report).await;
            } else {
                self.announce(destination, state, channel, stream, report).await;
            }
        }
    }

    async fn announce(
        &self,
        destination: &Destination,
        state: &mut DestinationState,
        channel: &ChannelHandle,
        stream: &LiveStream,
        report: &mut CycleReport,
    ) {
        let profile = self.source.streamer_profile(&stream.user_id).await;
        let notification = self.renderer.stream(
            stream,
            &destination.category,
            &profile,
            stream.viewer_count,
        );

        match self.channel.send(channel, &notification).await {
            Ok(message) => {
                report.sent += 1;
                info!(
                    destination = %destination.id,
                    stream_id = %stream.id,
                    streamer = %stream.user_name,
                    viewers = stream.viewer_count,
                    "Posted live notification"
                );
                state.entries.insert(
                    stream.id.clone(),
                    TrackedEntry {
                        message,
                        max_viewers: stream.viewer_count,
                        profile,
                    },
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    destination = %destination.id,
                    stream_id = %stream.id,
                    error = %e,
                    "Failed to post live notification"
                );
            }
        }
    }

    async fn refresh(
        &self,
        destination: &Destination,
        state: &mut DestinationState,
        stream: &LiveStream,
        report: &mut CycleReport,
    ) {
        let Some(entry) = state.entries.get_mut(&stream.id) else {
            return;
        };
        let max_viewers = entry.observe_viewers(stream.viewer_count);
        let notification = self.renderer.stream(
            stream,
            &destination.category,
            &entry.profile,
            max_viewers,
        );

        match self.channel.edit(&entry.message, &notification).await {
            Ok(()) => report.edited += 1,
            Err(DeliveryError::NotFound) => {
                info!(
                    destination = %destination.id,
                    stream_id = %stream.id,
                    "Notification was deleted externally, dropping it"
                );
                state.entries.remove(&stream.id);
            }
            Err(DeliveryError::Forbidden) => {
                warn!(
                    destination = %destination.id,
                    stream_id = %stream.id,
                    "Lost permission to edit notification, dropping it"
                );
                state.entries.remove(&stream.id);
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    destination = %destination.id,
                    stream_id = %stream.id,
                    error = %e,
                    "Failed to refresh notification, will retry next cycle"
                );
            }
        }
    }

    /// Delete a message. The caller has already dropped its tracking, a
    /// failed delete leaves the message behind.
    async fn retract(
        &self,
        destination: &Destination,
        message: &MessageHandle,
        label: &str,
        report: &mut CycleReport,
    ) {
        match self.channel.delete(message).await {
            Ok(()) => report.deleted += 1,
            Err(DeliveryError::NotFound) => {
                debug!(destination = %destination.id, label, "Message already gone");
            }
            Err(DeliveryError::Forbidden) => {
                warn!(destination = %destination.id, label, "Missing permission to delete message");
            }
            Err(e) => {
                report.failed += 1;
                warn!(destination = %destination.id, label, error = %e, "Failed to delete message");
            }
        }
    }

    /// The destination now points at a different channel: retract what was
    /// posted in the old one so the new channel starts fresh.
    async fn retract_relocated(
        &self,
        destination: &Destination,
        state: &mut DestinationState,
        channel: &ChannelHandle,
        report: &mut CycleReport,
    ) {
        info!(
            destination = %destination.id,
            channel = %channel.channel_id,
            "Destination moved to another channel, retracting old notifications"
        );
        let relocated: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.message.channel_id != channel.channel_id)
            .map(|(id, _)| id.clone())
            .collect();
        for stream_id in relocated {
            if let Some(entry) = state.entries.remove(&stream_id) {
                self.retract(destination, &entry.message, &stream_id, report).await;
            }
        }
        if let Some(marker) = state
            .no_streams
            .take_if(|m| m.message.channel_id != channel.channel_id)
        {
            self.retract(destination, &marker.message, "no-streams", report).await;
        }
    }
}
