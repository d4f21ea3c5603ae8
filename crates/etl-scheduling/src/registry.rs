//! Job Registry: declared tasks plus their recurring registrations.

use crate::config::TaskDeclaration;
use crate::recurrence::{Recurrence, RecurrenceEngine};
use crate::run_log::{LogEvent, RunLog};
use chrono::{DateTime, Local};
use etl_common::{Frequency, TaskName};
use serde::Serialize;
use std::fmt;
use tracing::info;

/// Whether a declared task has a recurring registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulingStatus {
    #[serde(rename = "Scheduled")]
    Scheduled,
    #[serde(rename = "Not scheduled")]
    NotScheduled,
}

impl fmt::Display for SchedulingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStatus::Scheduled => write!(f, "Scheduled"),
            SchedulingStatus::NotScheduled => write!(f, "Not scheduled"),
        }
    }
}

/// Point-in-time status of one declared task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub task_name: TaskName,
    pub frequency: Frequency,
    pub status: SchedulingStatus,
}

#[derive(Debug, Clone)]
pub struct JobRegistry {
    tasks: Vec<TaskDeclaration>,
    engine: RecurrenceEngine,
}

impl JobRegistry {
    pub fn new(tasks: Vec<TaskDeclaration>) -> Self {
        Self {
            tasks,
            engine: RecurrenceEngine::new(),
        }
    }

    /// Declared tasks, in configuration order.
    pub fn declared_tasks(&self) -> &[TaskDeclaration] {
        &self.tasks
    }

    pub fn find(&self, name: &TaskName) -> Option<&TaskDeclaration> {
        self.tasks.iter().find(|task| &task.name == name)
    }

    pub fn engine(&self) -> &RecurrenceEngine {
        &self.engine
    }

    pub fn is_scheduled(&self, name: &TaskName) -> bool {
        self.engine.is_registered(name)
    }

    pub fn scheduling_status(&self, name: &TaskName) -> SchedulingStatus {
        if self.is_scheduled(name) {
            SchedulingStatus::Scheduled
        } else {
            SchedulingStatus::NotScheduled
        }
    }

    /// Register a recurrence for `name`; `false` if one already exists.
    pub fn register(
        &mut self,
        name: &TaskName,
        recurrence: Recurrence,
        now: DateTime<Local>,
    ) -> bool {
        self.engine.register(name, recurrence, now)
    }

    /// Status of every declared task, in declaration order. Each status is
    /// also appended to `run_log` and printed.
    pub fn list_status(&self, run_log: &mut RunLog) -> Vec<TaskStatus> {
        info!("Scheduled Jobs and Tasks:");

        self.tasks
            .iter()
            .map(|task| {
                let status = TaskStatus {
                    task_name: task.name.clone(),
                    frequency: task.frequency.clone(),
                    status: self.scheduling_status(&task.name),
                };
                info!(
                    "- {}: {} ({})",
                    status.task_name, status.frequency, status.status
                );
                run_log.record(LogEvent::TaskStatus(status.clone()));
                status
            })
            .collect()
    }

    /// Declarations of the jobs due at `now`.
    pub fn due_tasks(&self, now: DateTime<Local>) -> Vec<TaskDeclaration> {
        self.engine
            .due(now)
            .iter()
            .filter_map(|name| self.find(name).cloned())
            .collect()
    }

    pub fn mark_ran(&mut self, name: &TaskName, now: DateTime<Local>) {
        self.engine.mark_ran(name, now);
    }
}
