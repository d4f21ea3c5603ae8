//! # ETL Scheduling
//!
//! Recurring-job scheduler for the ETL pipeline stages.
//!
//! This crate provides:
//! - YAML configuration loading and validation
//! - A recurrence engine (quarter-hourly, hourly, daily, weekly)
//! - The Job Registry and Task Launcher
//! - The Run Log, flushed as timestamped JSON files
//! - The Scheduler Core: startup, the running loop, and shutdown

pub mod config;
pub mod launcher;
pub mod recurrence;
pub mod registry;
pub mod run_log;
pub mod scheduler;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::{SchedulerConfig, SchedulerOptions, StopOptions, TaskDeclaration};
pub use launcher::{LaunchResult, LaunchStatus, TaskLauncher};
pub use recurrence::{Recurrence, RecurrenceEngine, ScheduledJob};
pub use registry::{JobRegistry, SchedulingStatus, TaskStatus};
pub use run_log::{LogEntry, LogEvent, RunLog};
pub use scheduler::{Scheduler, SchedulerIdentity, StopReport};
