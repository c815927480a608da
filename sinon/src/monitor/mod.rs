//! Stream monitoring for configured destinations.
//!
//! The monitor is responsible for:
//! - Fetching the live set of a category from Twitch
//! - Diffing it against what was already announced
//! - Posting, refreshing and retracting notifications
//! - Keeping per-destination state isolated and non-overlapping

mod reconciler;
mod source;
mod state;

pub use reconciler::{CycleReport, ReconcileOutcome, SkipReason, StreamReconciler};
pub use source::StreamSource;
pub use state::{DestinationState, DestinationSummary, NoStreamsMarker, TrackedEntry};
