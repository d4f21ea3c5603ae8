//! Run Log: every scheduling decision, buffered in memory and flushed to
//! `<log_dir>/scheduler/<YYYYMMDD>/<HHMMSS>.json`.

use crate::config::TaskDeclaration;
use crate::registry::TaskStatus;
use chrono::{DateTime, Local};
use etl_common::{Error, Frequency, Result, ResultExt, TaskName};
use etl_scheduler_state::SchedulerState;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const MAX_SAME_SECOND_FILES: u32 = 1000;

/// Success or failure of a logged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    Failed,
}

/// Why an action was skipped or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    AlreadyRunning,
    UnsupportedFrequency,
    NotRunning,
    ProcessNotFound,
    PermissionDenied,
    SignalFailed,
}

/// Outcome reported by `scheduler_finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishStatus {
    /// Startup pass complete.
    Success,
    /// Running scheduler received a shutdown signal.
    Shutdown,
}

/// Phases of a `stop` invocation and of the singleton check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerEventStatus {
    Started,
    AlreadyRunning,
    InstanceStopped,
    InstanceStopFailed,
    Finished,
}

/// One scheduling decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LogEvent {
    SkipTask {
        task_name: TaskName,
        reason: Reason,
        #[serde(skip_serializing_if = "Option::is_none")]
        frequency: Option<Frequency>,
    },
    StartTask {
        task_name: TaskName,
        process: String,
        status: EntryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StopTask {
        task_name: TaskName,
        process: String,
        status: EntryStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<Reason>,
        /// SIGKILL was needed.
        #[serde(skip_serializing_if = "Option::is_none")]
        escalated: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ScheduleTask {
        task_name: TaskName,
        frequency: Frequency,
        handler: String,
    },
    SchedulerFinished {
        status: FinishStatus,
    },
    StartScheduler {
        status: SchedulerEventStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },
    StopScheduler {
        status: SchedulerEventStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tasks_stopped: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tasks_failed: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timed_out: Option<bool>,
    },
    TaskStatus(TaskStatus),
}

impl LogEvent {
    pub fn action(&self) -> &'static str {
        match self {
            LogEvent::SkipTask { .. } => "skip_task",
            LogEvent::StartTask { .. } => "start_task",
            LogEvent::StopTask { .. } => "stop_task",
            LogEvent::ScheduleTask { .. } => "schedule_task",
            LogEvent::SchedulerFinished { .. } => "scheduler_finished",
            LogEvent::StartScheduler { .. } => "start_scheduler",
            LogEvent::StopScheduler { .. } => "stop_scheduler",
            LogEvent::TaskStatus(_) => "task_status",
        }
    }

    /// Task this entry is about, if any.
    pub fn task_name(&self) -> Option<&TaskName> {
        match self {
            LogEvent::SkipTask { task_name, .. }
            | LogEvent::StartTask { task_name, .. }
            | LogEvent::StopTask { task_name, .. }
            | LogEvent::ScheduleTask { task_name, .. } => Some(task_name),
            LogEvent::TaskStatus(status) => Some(&status.task_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Everything besides the buffered entries that goes into a flushed file.
#[derive(Debug)]
pub struct RunSnapshot<'a> {
    pub scheduler_status: SchedulerState,
    pub scheduled_tasks: &'a [TaskStatus],
    pub running_tasks: &'a [TaskStatus],
    pub start_delay_seconds: u64,
    pub jobs: &'a [TaskDeclaration],
}

#[derive(Serialize)]
struct ConfigSection<'a> {
    start_delay: u64,
    #[serde(serialize_with = "crate::config::serialize_jobs")]
    jobs: &'a [TaskDeclaration],
}

#[derive(Serialize)]
struct RunLogFile<'a> {
    timestamp: DateTime<Local>,
    scheduler_status: SchedulerState,
    scheduled_tasks: &'a [TaskStatus],
    running_tasks: &'a [TaskStatus],
    config: ConfigSection<'a>,
    log_messages: &'a [LogEntry],
}

/// Append-then-flush record of one scheduler invocation.
#[derive(Debug)]
pub struct RunLog {
    root: PathBuf,
    entries: Vec<LogEntry>,
}

impl RunLog {
    /// Run Log rooted at `<log_dir>/scheduler`.
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            root: log_dir.as_ref().join("scheduler"),
            entries: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record(&mut self, event: LogEvent) {
        debug!("Run log: {}", event.action());
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            event,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write buffered entries plus `snapshot` to a new timestamped file and
    /// clear the buffer. On error the buffer is kept for the next flush.
    pub async fn flush(&mut self, snapshot: RunSnapshot<'_>) -> Result<PathBuf> {
        let now = Local::now();
        let file = RunLogFile {
            timestamp: now,
            scheduler_status: snapshot.scheduler_status,
            scheduled_tasks: snapshot.scheduled_tasks,
            running_tasks: snapshot.running_tasks,
            config: ConfigSection {
                start_delay: snapshot.start_delay_seconds,
                jobs: snapshot.jobs,
            },
            log_messages: &self.entries,
        };
        let body = serde_json::to_vec_pretty(&file)
            .map_err(|e| Error::serialization(format!("Failed to encode run log: {}", e)))?;

        let dir = self.root.join(now.format("%Y%m%d").to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(Error::from)
            .context(format!("Failed to create {}", dir.display()))?;

        let stem = now.format("%H%M%S").to_string();
        let path = write_new_file(&dir, &stem, &body)
            .await
            .context(format!("Failed to write run log in {}", dir.display()))?;

        self.entries.clear();
        Ok(path)
    }
}

// Flushes within the same second get `_1`, `_2`, ... instead of overwriting.
async fn write_new_file(dir: &Path, stem: &str, body: &[u8]) -> Result<PathBuf> {
    for attempt in 0..MAX_SAME_SECOND_FILES {
        let name = if attempt == 0 {
            format!("{}.json", stem)
        } else {
            format!("{}_{}.json", stem, attempt)
        };
        let path = dir.join(name);

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };

        file.write_all(body).await?;
        file.flush().await?;
        return Ok(path);
    }

    Err(Error::Internal(format!(
        "Too many run log files for {} in {}",
        stem,
        dir.display()
    )))
}
