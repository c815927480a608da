//! Notification channels.
//!
//! A channel sends, edits and deletes rendered notifications in a target
//! chat channel. Discord is the only implementation.

mod discord;

pub use discord::{DiscordChannel, DiscordConfig};

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::render::Notification;
use crate::domain::ChannelId;

/// Result of a delivery operation.
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Why a delivery operation failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The channel or message no longer exists.
    #[error("target not found")]
    NotFound,

    /// The bot lost permission to act on the target.
    #[error("missing permissions")]
    Forbidden,

    /// Still rate limited after waiting once.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

impl DeliveryError {
    /// Whether the target is gone for good and tracking should be dropped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound | Self::Forbidden)
    }
}

/// A channel that was confirmed to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelHandle {
    pub channel_id: ChannelId,
}

/// A message previously sent by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: u64,
}

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Confirm that a channel exists and is visible to the bot.
    ///
    /// `NotFound` and `Forbidden` mean the channel is unusable; any other
    /// error is transient.
    async fn resolve_channel(&self, channel_id: ChannelId) -> DeliveryResult<ChannelHandle>;

    /// Post a new message.
    async fn send(
        &self,
        channel: &ChannelHandle,
        notification: &Notification,
    ) -> DeliveryResult<MessageHandle>;

    /// Replace the content of a message.
    async fn edit(&self, message: &MessageHandle, notification: &Notification)
    -> DeliveryResult<()>;

    /// Delete a message.
    async fn delete(&self, message: &MessageHandle) -> DeliveryResult<()>;

    /// Delete every message the bot previously posted in `channel`.
    /// Returns how many were deleted.
    async fn purge_own_messages(&self, channel: &ChannelHandle) -> DeliveryResult<usize>;
}
