//! Scheduler Core.
//!
//! One `Scheduler` value drives one process lifetime:
//!
//! - [`Scheduler::start`] checks the singleton invariant, launches every
//!   declared task (staggered by `start_delay_seconds`), registers their
//!   recurrences and runs whatever is already due.
//! - [`Scheduler::run_until`] keeps launching due jobs until shutdown.
//! - [`Scheduler::stop`] terminates every process belonging to a declared
//!   task and waits (bounded) for them to disappear.
//!
//! All failures below the singleton check are converted into Run Log
//! entries; nothing else escapes.

mod shutdown;


pub use shutdown::StopReport;

use crate::config::{SchedulerConfig, SchedulerOptions};
use crate::launcher::{LaunchStatus, TaskLauncher};
use crate::recurrence::Recurrence;
use crate::registry::{JobRegistry, TaskStatus};
use crate::run_log::{FinishStatus, LogEvent, Reason, RunLog, RunSnapshot, SchedulerEventStatus};
use chrono::{DateTime, Local};
use etl_common::{ProcessError, ProcessResult};
use etl_process::{ProcessEntry, ProcessHost, ProcessInspector, TaskPattern};
use etl_scheduler_state::{SchedulerState, SchedulerStateMachine};
use std::future::Future;
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const DEFAULT_PROGRAM_NAME: &str = "etl-scheduler";

/// Name and PID this scheduler process is known by in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerIdentity {
    pub program_name: String,
    pub pid: u32,
}

impl SchedulerIdentity {
    /// Identity of the running executable.
    pub fn current() -> Self {
        let program_name = std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_PROGRAM_NAME.to_string());

        Self {
            program_name,
            pid: std::process::id(),
        }
    }

    fn pattern(&self) -> TaskPattern {
        TaskPattern::program(&self.program_name)
    }
}

// `etl-scheduler stop` must not count as another running scheduler.
fn is_stop_invocation(entry: &ProcessEntry) -> bool {
    entry.argv.iter().skip(1).any(|arg| arg == "stop")
}

pub struct Scheduler<H> {
    options: SchedulerOptions,
    registry: JobRegistry,
    run_log: RunLog,
    state: SchedulerStateMachine,
    identity: SchedulerIdentity,
    host: H,
}

impl<H: ProcessHost> Scheduler<H> {
    pub fn new(config: SchedulerConfig, host: H) -> Self {
        Self::with_identity(config, host, SchedulerIdentity::current())
    }

    pub fn with_identity(config: SchedulerConfig, host: H, identity: SchedulerIdentity) -> Self {
        let SchedulerConfig { scheduler, jobs } = config;
        Self {
            run_log: RunLog::new(&scheduler.log_dir),
            state: SchedulerStateMachine::new(&identity.program_name),
            registry: JobRegistry::new(jobs),
            options: scheduler,
            identity,
            host,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state.current_state()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Startup pass. Fails only when another scheduler is already running.
    pub async fn start(&mut self) -> ProcessResult<()> {
        self.transition(SchedulerState::Starting, "start requested")?;

        if let Some(pid) = self.find_other_instance() {
            warn!("Scheduler is already running (PID {}). Exiting...", pid);
            self.run_log.record(LogEvent::StartScheduler {
                status: SchedulerEventStatus::AlreadyRunning,
                pid: Some(pid),
            });
            self.persist_run_log().await;
            self.transition(SchedulerState::Stopped, "scheduler already running")?;
            return Err(ProcessError::already_running(
                &self.identity.program_name,
                pid,
            ));
        }

        info!("Starting all tasks...");
        self.launch_declared_tasks().await;

        self.register_recurrences(Local::now());
        self.persist_run_log().await;

        info!("Running due tasks...");
        self.run_due_tasks(Local::now());
        info!("Scheduler has finished setting up tasks.");
        self.run_log.record(LogEvent::SchedulerFinished {
            status: FinishStatus::Success,
        });
        self.persist_run_log().await;

        self.transition(SchedulerState::Running, "startup complete")
    }

    /// Launch due jobs every `tick_interval` until `shutdown` resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> ProcessResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.state() != SchedulerState::Running {
            return Err(ProcessError::invalid_state(
                &self.identity.program_name,
                SchedulerState::Running.to_string(),
                self.state().to_string(),
            ));
        }

        self.log_next_wakeup();
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if self.run_due_tasks(Local::now()) > 0 {
                        self.persist_run_log().await;
                        self.log_next_wakeup();
                    }
                }
            }
        }

        info!("Shutdown requested, scheduler exiting");
        self.transition(SchedulerState::Stopping, "shutdown signal")?;
        self.run_log.record(LogEvent::SchedulerFinished {
            status: FinishStatus::Shutdown,
        });
        self.persist_run_log().await;
        self.transition(SchedulerState::Stopped, "shutdown complete")
    }

    fn log_next_wakeup(&self) {
        match self.registry.engine().next_wakeup() {
            Some(next) => info!("Next job due at {}", next.format("%Y-%m-%d %H:%M:%S")),
            None => info!("No recurring jobs registered"),
        }
    }

    fn transition(&mut self, target: SchedulerState, reason: &str) -> ProcessResult<()> {
        self.state.transition_to(target, Some(reason.to_string()))
    }

    fn find_other_instance(&self) -> Option<u32> {
        let inspector = ProcessInspector::new(&self.host);
        match inspector.find_pids_where(
            &self.identity.pattern(),
            self.identity.pid,
            |entry| !is_stop_invocation(entry),
        ) {
            Ok(pids) => pids.first().copied(),
            Err(e) => {
                warn!("Could not check for a running scheduler: {}", e);
                None
            }
        }
    }

    async fn launch_declared_tasks(&mut self) {
        let tasks = self.registry.declared_tasks().to_vec();
        let launcher = TaskLauncher::new(&self.host);

        for (index, task) in tasks.iter().enumerate() {
            let result = launcher.launch(task, &mut self.run_log);
            let is_last = index + 1 == tasks.len();
            if result.status != LaunchStatus::Skipped && !is_last {
                tokio::time::sleep(self.options.start_delay()).await;
            }
        }
    }

    fn register_recurrences(&mut self, now: DateTime<Local>) {
        let tasks = self.registry.declared_tasks().to_vec();

        for task in &tasks {
            let Some(recurrence) = Recurrence::for_frequency(&task.frequency, self.options.daily_at)
            else {
                warn!(
                    "Unsupported frequency '{}' for task {}, not scheduling it",
                    task.frequency, task.name
                );
                self.run_log.record(LogEvent::SkipTask {
                    task_name: task.name.clone(),
                    reason: Reason::UnsupportedFrequency,
                    frequency: Some(task.frequency.clone()),
                });
                continue;
            };

            if self.registry.register(&task.name, recurrence, now) {
                info!("Scheduled {} ({})", task.name, recurrence);
                self.run_log.record(LogEvent::ScheduleTask {
                    task_name: task.name.clone(),
                    frequency: task.frequency.clone(),
                    handler: task.name.handler_id(),
                });
            }
        }
    }

    /// Launch every job due at `now`; returns how many were due.
    pub(crate) fn run_due_tasks(&mut self, now: DateTime<Local>) -> usize {
        let due = self.registry.due_tasks(now);
        let launcher = TaskLauncher::new(&self.host);

        for task in &due {
            self.registry.mark_ran(&task.name, now);
            launcher.launch(task, &mut self.run_log);
        }
        due.len()
    }

    /// Flush the Run Log with a fresh status snapshot. Write failures are
    /// logged, never propagated.
    async fn persist_run_log(&mut self) -> Option<PathBuf> {
        let scheduled = self.registry.list_status(&mut self.run_log);

        let inspector = ProcessInspector::new(&self.host);
        let running: Vec<TaskStatus> = scheduled
            .iter()
            .filter(|status| {
                self.registry
                    .find(&status.task_name)
                    .is_some_and(|task| inspector.is_running(&task.pattern()))
            })
            .cloned()
            .collect();

        let snapshot = RunSnapshot {
            scheduler_status: self.state.current_state(),
            scheduled_tasks: &scheduled,
            running_tasks: &running,
            start_delay_seconds: self.options.start_delay_seconds,
            jobs: self.registry.declared_tasks(),
        };

        match self.run_log.flush(snapshot).await {
            Ok(path) => {
                info!("Scheduler log created: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!(
                    "Failed to write scheduler log under {}: {}",
                    self.run_log.root().display(),
                    e
                );
                None
            }
        }
    }
}
