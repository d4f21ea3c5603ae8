//! # ETL Process
//!
//! Low-level process operations used by the task scheduler.
//!
//! This crate provides:
//! - Process existence checks (`kill(pid, 0)` on Unix)
//! - Process table snapshots and task matching by command line
//! - Detached spawning of task entry points
//! - Signal delivery and graceful-then-forceful termination
//!
//! Every OS touch point sits behind a small trait ([`ProcessTable`],
//! [`Spawner`], [`Signaller`]) so the scheduler can be driven against an
//! in-memory host in tests.

pub mod check;
pub mod execute;
pub mod host;
pub mod inspect;
pub mod terminate;

// Re-export main types
pub use check::process_exists;
pub use execute::{LaunchSpec, Spawner, SystemSpawner};
pub use host::{ProcessHost, SystemProcesses};
pub use inspect::{ProcessEntry, ProcessInspector, ProcessTable, SystemProcessTable, TaskPattern};
pub use terminate::{
    ProcessSignal, SignalError, Signaller, SystemSignaller, TerminationOutcome, Terminator,
    TerminatorOptions,
};
