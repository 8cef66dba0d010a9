//! trackq worker: the dispatch loop and its host.
//!
//! [`Monitor`] runs single cycles against a [`JobStore`](trackq_db::JobStore)
//! and a [`Runner`](trackq_runner::Runner); [`Scheduler`] repeats them on
//! an interval under a cross-process lock.

pub mod config;
pub mod monitor;
pub mod scheduler;

pub use config::{ConfigError, LogFormat, WorkerConfig};
pub use monitor::{CycleOutcome, CycleReport, Monitor, MonitorConfig, MonitorError, PollPolicy};
pub use scheduler::Scheduler;
