//! Periodic reconcile passes.

mod service;

pub use service::{Scheduler, SchedulerConfig, SchedulerControl};
