//! Statistics collector.
//!
//! Counts reconcile passes and delivery operations for the dashboard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::monitor::{ReconcileOutcome, SkipReason};

#[derive(Debug)]
pub struct StatsCollector {
    started: Instant,
    started_at: DateTime<Utc>,

    passes: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    skipped_by_reason: DashMap<SkipReason, AtomicU64>,

    messages_sent: AtomicU64,
    messages_edited: AtomicU64,
    messages_deleted: AtomicU64,
    delivery_failures: AtomicU64,

    last_pass_at: RwLock<Option<DateTime<Utc>>>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            passes: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            skipped_by_reason: DashMap::new(),
            messages_sent: AtomicU64::new(0),
            messages_edited: AtomicU64::new(0),
            messages_deleted: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            last_pass_at: RwLock::new(None),
        }
    }

    /// Record a finished `reconcile_all` pass.
    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        *self.last_pass_at.write() = Some(Utc::now());
    }

    /// Record the outcome of one destination cycle.
    pub fn record_outcome(&self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Completed(report) => {
                self.cycles_completed.fetch_add(1, Ordering::Relaxed);
                self.messages_sent
                    .fetch_add(report.sent as u64, Ordering::Relaxed);
                self.messages_edited
                    .fetch_add(report.edited as u64, Ordering::Relaxed);
                self.messages_deleted
                    .fetch_add(report.deleted as u64, Ordering::Relaxed);
                self.delivery_failures
                    .fetch_add(report.failed as u64, Ordering::Relaxed);
            }
            ReconcileOutcome::Skipped(reason) => {
                self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                self.skipped_by_reason
                    .entry(*reason)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BotStats {
        let mut skipped_by_reason: Vec<(SkipReason, u64)> = self
            .skipped_by_reason
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        skipped_by_reason.sort_by_key(|(reason, _)| reason.as_str());

        BotStats {
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
            passes: self.passes.load(Ordering::Relaxed),
            last_pass_at: *self.last_pass_at.read(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            skipped_by_reason: skipped_by_reason
                .into_iter()
                .map(|(reason, count)| (reason.as_str().to_string(), count))
                .collect(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_edited: self.messages_edited.load(Ordering::Relaxed),
            messages_deleted: self.messages_deleted.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BotStats {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub passes: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub skipped_by_reason: Vec<(String, u64)>,
    pub messages_sent: u64,
    pub messages_edited: u64,
    pub messages_deleted: u64,
    pub delivery_failures: u64,
}
