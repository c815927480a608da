//! Scheduler service.
//!
//! A single timer drives one reconcile pass over every configured
//! destination. Destinations are re-read from the store at the start of each
//! pass. A pass that overruns the interval delays the next tick instead of
//! queueing extra ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_CHECK_INTERVAL, DestinationSource};
use crate::domain::DestinationId;
use crate::monitor::{ReconcileOutcome, StreamReconciler};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between passes.
    pub check_interval: Duration,
    /// Delete the bot's previous messages before the first pass.
    pub purge_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            purge_on_startup: false,
        }
    }
}

/// Pause/resume switch shared with the dashboard.
#[derive(Debug, Default)]
pub struct SchedulerControl {
    paused: AtomicBool,
    wake: Notify,
}

impl SchedulerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop running passes until resumed. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let changed = !self.paused.swap(true, Ordering::SeqCst);
        if changed {
            info!("Polling paused");
        }
        changed
    }

    /// Resume polling and run a pass right away. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let changed = self.paused.swap(false, Ordering::SeqCst);
        if changed {
            info!("Polling resumed");
            self.wake.notify_one();
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> &'static str {
        if self.is_paused() { "paused" } else { "running" }
    }
}

/// Drives [`StreamReconciler::reconcile_all`] on a fixed interval.
pub struct Scheduler {
    reconciler: Arc<StreamReconciler>,
    destinations: Arc<dyn DestinationSource>,
    config: SchedulerConfig,
    control: Arc<SchedulerControl>,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<StreamReconciler>,
        destinations: Arc<dyn DestinationSource>,
        config: SchedulerConfig,
        control: Arc<SchedulerControl>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            destinations,
            config,
            control,
            cancellation_token,
        }
    }

    /// Run one pass over the destinations currently in the store.
    ///
    /// If the store cannot be read the pass is skipped and no state changes.
    pub async fn run_pass(&self) -> Option<Vec<(DestinationId, ReconcileOutcome)>> {
        let destinations = match self.destinations.destinations().await {
            Ok(destinations) => destinations,
            Err(e) => {
                warn!(error = %e, "Failed to read destinations, skipping pass");
                return None;
            }
        };

        debug!(count = destinations.len(), "Starting reconcile pass");
        let results = self.reconciler.reconcile_all(destinations).await;
        let skipped = results.iter().filter(|(_, o)| o.is_skipped()).count();
        debug!(
            destinations = results.len(),
            skipped, "Reconcile pass finished"
        );
        Some(results)
    }

    /// Delete messages left behind by a previous run in every configured
    /// channel. Failures are logged and never abort startup.
    pub async fn purge_previous_messages(&self) -> usize {
        let destinations = match self.destinations.destinations().await {
            Ok(destinations) => destinations,
            Err(e) => {
                warn!(error = %e, "Failed to read destinations, skipping purge");
                return 0;
            }
        };

        let channel = self.reconciler.channel();
        let mut purged = 0;
        for destination in destinations {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            let handle = match channel.resolve_channel(destination.channel_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(
                        destination = %destination.id,
                        error = %e,
                        "Cannot purge, channel unavailable"
                    );
                    continue;
                }
            };
            match channel.purge_own_messages(&handle).await {
                Ok(count) => purged += count,
                Err(e) => {
                    warn!(
                        destination = %destination.id,
                        error = %e,
                        "Failed to purge previous messages"
                    );
                }
            }
        }
        purged
    }

    /// Run until cancelled.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            "Scheduler started"
        );

        if self.config.purge_on_startup {
            let purged = self.purge_previous_messages().await;
            info!(purged, "Startup purge finished");
        }

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.control.wake.notified() => {
                    ticker.reset();
                }
            }

            if self.control.is_paused() {
                debug!("Polling paused, skipping pass");
                continue;
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = self.run_pass() => {}
            }
        }

        info!("Scheduler stopped");
    }
}
