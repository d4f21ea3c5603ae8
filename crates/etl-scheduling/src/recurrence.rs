//! Recurrence rules and the engine that tracks when each job is next due.
//!
//! The engine never launches anything itself: the scheduler asks it for the
//! jobs due at a given instant and reports back once they ran.

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use etl_common::{Frequency, TaskName};
use std::fmt;
use std::time::Duration;

const QUARTER_HOUR: Duration = Duration::from_secs(15 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How often a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// Fixed interval measured from the previous run (or registration).
    Every(Duration),
    /// Once a day at the given local wall-clock time.
    DailyAt(NaiveTime),
}

impl Recurrence {
    /// Rule for a frequency; `None` for an unsupported one.
    pub fn for_frequency(frequency: &Frequency, daily_at: NaiveTime) -> Option<Self> {
        match frequency {
            Frequency::QuarterHourly => Some(Recurrence::Every(QUARTER_HOUR)),
            Frequency::Hourly => Some(Recurrence::Every(HOUR)),
            Frequency::Daily => Some(Recurrence::DailyAt(daily_at)),
            Frequency::Weekly => Some(Recurrence::Every(WEEK)),
            Frequency::Unsupported(_) => None,
        }
    }

    /// First firing strictly after `reference`.
    pub fn next_after(&self, reference: DateTime<Local>) -> DateTime<Local> {
        match self {
            Recurrence::Every(interval) => {
                let step = chrono::Duration::from_std(*interval)
                    .unwrap_or_else(|_| chrono::Duration::days(1));
                reference + step
            }
            Recurrence::DailyAt(time) => next_daily(reference, *time),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Every(interval) => write!(f, "every {}s", interval.as_secs()),
            Recurrence::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M")),
        }
    }
}

fn next_daily(reference: DateTime<Local>, time: NaiveTime) -> DateTime<Local> {
    let mut date = reference.date_naive();

    // Today, tomorrow, or the day after if a DST gap swallows tomorrow's slot.
    for _ in 0..3 {
        if let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > reference {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    reference + chrono::Duration::days(1)
}

/// A registered recurring job.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub task_name: TaskName,
    /// Identifier of the handler bound to this job (`run_task_<name>`).
    pub handler: String,
    pub recurrence: Recurrence,
    pub next_run: DateTime<Local>,
    pub last_run: Option<DateTime<Local>>,
}

/// Registered jobs, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RecurrenceEngine {
    jobs: Vec<ScheduledJob>,
}

impl RecurrenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task_name`. Returns `false` (and changes nothing) if a job
    /// for the task already exists.
    pub fn register(
        &mut self,
        task_name: &TaskName,
        recurrence: Recurrence,
        now: DateTime<Local>,
    ) -> bool {
        if self.is_registered(task_name) {
            return false;
        }

        self.jobs.push(ScheduledJob {
            task_name: task_name.clone(),
            handler: task_name.handler_id(),
            recurrence,
            next_run: recurrence.next_after(now),
            last_run: None,
        });
        true
    }

    pub fn is_registered(&self, task_name: &TaskName) -> bool {
        self.jobs.iter().any(|job| &job.task_name == task_name)
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    pub fn job(&self, task_name: &TaskName) -> Option<&ScheduledJob> {
        self.jobs.iter().find(|job| &job.task_name == task_name)
    }

    /// Tasks whose next run is at or before `now`.
    pub fn due(&self, now: DateTime<Local>) -> Vec<TaskName> {
        self.jobs
            .iter()
            .filter(|job| job.next_run <= now)
            .map(|job| job.task_name.clone())
            .collect()
    }

    /// Record that `task_name` ran at `now` and schedule its next run.
    pub fn mark_ran(&mut self, task_name: &TaskName, now: DateTime<Local>) {
        if let Some(job) = self.jobs.iter_mut().find(|job| &job.task_name == task_name) {
            job.last_run = Some(now);
            job.next_run = job.recurrence.next_after(now);
        }
    }

    /// Earliest upcoming run across all jobs.
    pub fn next_wakeup(&self) -> Option<DateTime<Local>> {
        self.jobs.iter().map(|job| job.next_run).min()
    }
}
