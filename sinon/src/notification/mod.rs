//! Discord notifications.
//!
//! [`render`] turns streams into embeds, [`channels`] delivers them.

pub mod channels;
pub mod render;

pub use channels::{
    ChannelHandle, DeliveryError, DeliveryResult, DiscordChannel, DiscordConfig, MessageHandle,
    NotificationChannel,
};
pub use render::{Embed, EmbedRenderer, Notification};
