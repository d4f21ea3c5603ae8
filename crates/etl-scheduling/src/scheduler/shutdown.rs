use super::{is_stop_invocation, Scheduler};
use crate::config::TaskDeclaration;
use crate::run_log::{EntryStatus, LogEvent, Reason, SchedulerEventStatus};
use etl_common::{ProcessError, ProcessResult};
use etl_process::{ProcessHost, ProcessInspector, TerminationOutcome, Terminator};
use etl_scheduler_state::SchedulerState;
use tokio::time::Instant;
use tracing::{info, warn};

/// Aggregate result of a `stop` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Processes confirmed gone (exited after SIGTERM or killed).
    pub tasks_stopped: u32,
    /// Tasks with nothing to stop, plus processes that could not be signalled.
    pub tasks_failed: u32,
    /// Some task process was still alive when the stop timeout expired.
    pub timed_out: bool,
}

impl<H: ProcessHost> Scheduler<H> {
    /// Shutdown pass: terminate any running scheduler instance, then every
    /// process belonging to a declared task.
    pub async fn stop(&mut self) -> ProcessResult<StopReport> {
        // The timeout bounds the whole pass, terminations included.
        let deadline = Instant::now() + self.options.stop.timeout;
        self.transition(SchedulerState::Stopping, "stop requested")?;
        info!("Stopping scheduler and all tasks...");
        self.run_log.record(LogEvent::StopScheduler {
            status: SchedulerEventStatus::Started,
            pid: None,
            tasks_stopped: None,
            tasks_failed: None,
            timed_out: None,
        });

        self.stop_other_instances().await;

        let tasks = self.registry.declared_tasks().to_vec();
        let mut report = StopReport::default();
        for task in &tasks {
            self.stop_task(task, &mut report).await;
        }

        report.timed_out = !self.await_tasks_gone(&tasks, deadline).await;

        info!(
            "Scheduler stop finished: {} stopped, {} failed",
            report.tasks_stopped, report.tasks_failed
        );
        self.run_log.record(LogEvent::StopScheduler {
            status: SchedulerEventStatus::Finished,
            pid: None,
            tasks_stopped: Some(report.tasks_stopped),
            tasks_failed: Some(report.tasks_failed),
            timed_out: Some(report.timed_out),
        });
        self.persist_run_log().await;
        self.transition(SchedulerState::Stopped, "stop complete")?;

        Ok(report)
    }

    // A running scheduler would relaunch tasks behind our back.
    async fn stop_other_instances(&mut self) {
        let inspector = ProcessInspector::new(&self.host);
        let pids = match inspector.find_pids_where(
            &self.identity.pattern(),
            self.identity.pid,
            |entry| !is_stop_invocation(entry),
        ) {
            Ok(pids) => pids,
            Err(e) => {
                warn!("Could not look up running scheduler instances: {}", e);
                return;
            }
        };

        let terminator = Terminator::new(&self.host, self.options.stop.terminator_options());
        for pid in pids {
            info!("Stopping running scheduler instance (PID {})", pid);
            let status = if terminator.terminate(pid).await.is_stopped() {
                SchedulerEventStatus::InstanceStopped
            } else {
                SchedulerEventStatus::InstanceStopFailed
            };
            self.run_log.record(LogEvent::StopScheduler {
                status,
                pid: Some(pid),
                tasks_stopped: None,
                tasks_failed: None,
                timed_out: None,
            });
        }
    }

    async fn stop_task(&mut self, task: &TaskDeclaration, report: &mut StopReport) {
        let inspector = ProcessInspector::new(&self.host);
        let pids = match inspector.find_pids(&task.pattern(), self.identity.pid) {
            Ok(pids) if !pids.is_empty() => pids,
            Ok(_) => {
                info!("No running process found for task {}", task.base_name());
                self.record_not_running(task);
                report.tasks_failed += 1;
                return;
            }
            Err(e) => {
                warn!("Error finding processes for task {}: {}", task.base_name(), e);
                self.record_not_running(task);
                report.tasks_failed += 1;
                return;
            }
        };
        info!("Found PIDs for task {}: {:?}", task.base_name(), pids);

        let terminator = Terminator::new(&self.host, self.options.stop.terminator_options());
        for pid in pids {
            let outcome = terminator.terminate(pid).await;
            let (status, reason, error) = match &outcome {
                TerminationOutcome::Exited | TerminationOutcome::Killed => {
                    info!("Stopped task {} (PID {})", task.base_name(), pid);
                    report.tasks_stopped += 1;
                    (EntryStatus::Success, None, None)
                }
                TerminationOutcome::NotFound => {
                    info!("Process {} already exited", pid);
                    (EntryStatus::Failed, Some(Reason::ProcessNotFound), None)
                }
                TerminationOutcome::PermissionDenied => {
                    warn!("Permission denied to stop task {} (PID {})", task.base_name(), pid);
                    report.tasks_failed += 1;
                    (EntryStatus::Failed, Some(Reason::PermissionDenied), None)
                }
                TerminationOutcome::Failed(e) => {
                    warn!("Failed to stop task {} (PID {}): {}", task.base_name(), pid, e);
                    report.tasks_failed += 1;
                    (EntryStatus::Failed, Some(Reason::SignalFailed), Some(e.clone()))
                }
            };

            self.run_log.record(LogEvent::StopTask {
                task_name: task.name.clone(),
                process: task.base_name().to_string(),
                status,
                pid: Some(pid),
                reason,
                escalated: outcome
                    .is_stopped()
                    .then_some(outcome == TerminationOutcome::Killed),
                error,
            });

            tokio::time::sleep(self.options.stop.pause_between).await;
        }
    }

    fn record_not_running(&mut self, task: &TaskDeclaration) {
        self.run_log.record(LogEvent::StopTask {
            task_name: task.name.clone(),
            process: task.base_name().to_string(),
            status: EntryStatus::Failed,
            pid: None,
            reason: Some(Reason::NotRunning),
            escalated: None,
            error: None,
        });
    }

    /// Poll until no declared task has a live process. `false` once
    /// `deadline` passes with something still running.
    async fn await_tasks_gone(&self, tasks: &[TaskDeclaration], deadline: Instant) -> bool {
        let inspector = ProcessInspector::new(&self.host);

        loop {
            let still_running: Vec<&str> = tasks
                .iter()
                .filter(|task| {
                    inspector
                        .find_pids(&task.pattern(), self.identity.pid)
                        .is_ok_and(|pids| !pids.is_empty())
                })
                .map(|task| task.base_name())
                .collect();

            if still_running.is_empty() {
                info!("All tasks have been stopped successfully.");
                return true;
            }

            if Instant::now() >= deadline {
                let timeout = ProcessError::timeout(
                    still_running.join(", "),
                    format!("stop within {:?}", self.options.stop.timeout),
                );
                warn!("Not all tasks could be stopped: {}", timeout);
                return false;
            }

            tokio::time::sleep(self.options.stop.poll_interval).await;
        }
    }
}
