//! Core domain types shared by configuration, registry and scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name of a declared pipeline task, e.g. `start_extract`.
///
/// The name is the task's identity: registrations, run log entries and
/// status listings are all keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    /// Creates a new TaskName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the task name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the recurrence handler registered for this task.
    pub fn handler_id(&self) -> String {
        format!("run_task_{}", self.0)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How often a declared task is re-launched.
///
/// Values outside the known set are kept verbatim as `Unsupported` so a
/// configuration containing them still loads; the scheduler reports them
/// instead of registering a recurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    /// Every 15 minutes.
    QuarterHourly,
    /// Every hour.
    Hourly,
    /// Once a day at the configured time of day.
    Daily,
    /// Every seven days.
    Weekly,
    /// Anything else found in the configuration.
    Unsupported(String),
}

impl Frequency {
    pub fn as_str(&self) -> &str {
        match self {
            Frequency::QuarterHourly => "quarterhourly",
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Unsupported(raw) => raw,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Frequency::Unsupported(_))
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Hourly
    }
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        match s.as_str() {
            "quarterhourly" => Frequency::QuarterHourly,
            "hourly" => Frequency::Hourly,
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            _ => Frequency::Unsupported(s),
        }
    }
}

impl From<&str> for Frequency {
    fn from(s: &str) -> Self {
        Frequency::from(s.to_string())
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.as_str().to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
