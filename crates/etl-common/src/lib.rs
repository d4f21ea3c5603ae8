//! # ETL Common
//!
//! Types shared by every crate of the ETL task scheduler: the error
//! enums used across process and scheduling code, and the small domain
//! vocabulary (task names, recurrence frequencies) the configuration and
//! the scheduler agree on.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, ProcessError, ProcessResult, Result, ResultExt};
pub use types::{Frequency, TaskName};
