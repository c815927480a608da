//! Runtime statistics.

mod collector;

pub use collector::{BotStats, StatsCollector};
