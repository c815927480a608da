//! Core domain types shared by the reconciler, the settings store and the
//! dashboard.

pub mod destination;

pub use destination::{ChannelId, Destination, DestinationId};
