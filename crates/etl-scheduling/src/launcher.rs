//! Task Launcher: start a task unless it is already running.

use crate::config::TaskDeclaration;
use crate::run_log::{EntryStatus, LogEvent, Reason, RunLog};
use etl_process::{ProcessInspector, ProcessTable, Spawner};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    Started,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchResult {
    pub status: LaunchStatus,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl LaunchResult {
    fn started(pid: u32) -> Self {
        Self {
            status: LaunchStatus::Started,
            pid: Some(pid),
            error: None,
        }
    }

    fn skipped() -> Self {
        Self {
            status: LaunchStatus::Skipped,
            pid: None,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: LaunchStatus::Failed,
            pid: None,
            error: Some(error),
        }
    }
}

pub struct TaskLauncher<'a, H> {
    host: &'a H,
}

impl<'a, H: ProcessTable + Spawner> TaskLauncher<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Launch `task` detached. Appends exactly one entry to `run_log`.
    pub fn launch(&self, task: &TaskDeclaration, run_log: &mut RunLog) -> LaunchResult {
        let inspector = ProcessInspector::new(self.host);

        if inspector.is_running(&task.pattern()) {
            info!("Task {} is already running. Skipping...", task.base_name());
            run_log.record(LogEvent::SkipTask {
                task_name: task.name.clone(),
                reason: Reason::AlreadyRunning,
                frequency: None,
            });
            return LaunchResult::skipped();
        }

        info!("Starting task: {}", task.base_name());
        match self.host.spawn(&task.launch_spec()) {
            Ok(pid) => {
                run_log.record(LogEvent::StartTask {
                    task_name: task.name.clone(),
                    process: task.base_name().to_string(),
                    status: EntryStatus::Success,
                    pid: Some(pid),
                    error: None,
                });
                LaunchResult::started(pid)
            }
            Err(e) => {
                error!("Error starting task {}: {}", task.base_name(), e);
                run_log.record(LogEvent::StartTask {
                    task_name: task.name.clone(),
                    process: task.base_name().to_string(),
                    status: EntryStatus::Failed,
                    pid: None,
                    error: Some(e.to_string()),
                });
                LaunchResult::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use etl_common::Frequency;

    fn task() -> TaskDeclaration {
        TaskDeclaration::new("jobA", "scripts/a.py", Frequency::Hourly).with_interpreter("python3")
    }

    #[test]
    fn test_launch_starts_idle_task() {
        let host = FakeHost::new();
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = RunLog::new(dir.path());

        let result = TaskLauncher::new(&host).launch(&task(), &mut run_log);
        assert_eq!(result.status, LaunchStatus::Started);
        assert!(result.pid.is_some());
        assert_eq!(host.spawned()[0].argv(), vec!["python3", "scripts/a.py"]);

        assert_eq!(run_log.entries().len(), 1);
        match &run_log.entries()[0].event {
            LogEvent::StartTask { status, pid, .. } => {
                assert_eq!(*status, EntryStatus::Success);
                assert_eq!(*pid, result.pid);
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_launch_skips_running_task() {
        let host = FakeHost::new();
        host.add_process(4242, &["/usr/bin/python3", "/opt/etl/scripts/a.py"]);
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = RunLog::new(dir.path());

        let result = TaskLauncher::new(&host).launch(&task(), &mut run_log);
        assert_eq!(result.status, LaunchStatus::Skipped);
        assert!(host.spawned().is_empty());
        assert_eq!(run_log.entries().len(), 1);
        assert_eq!(run_log.entries()[0].event.action(), "skip_task");
    }

    #[test]
    fn test_launch_does_not_confuse_similar_names() {
        let host = FakeHost::new();
        host.add_process(4242, &["python3", "scripts/a.py.bak"]);
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = RunLog::new(dir.path());

        let result = TaskLauncher::new(&host).launch(&task(), &mut run_log);
        assert_eq!(result.status, LaunchStatus::Started);
    }

    #[test]
    fn test_spawn_failure_is_logged() {
        let host = FakeHost::new();
        host.fail_spawn("scripts/a.py");
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = RunLog::new(dir.path());

        let result = TaskLauncher::new(&host).launch(&task(), &mut run_log);
        assert_eq!(result.status, LaunchStatus::Failed);
        assert!(result.error.is_some());

        match &run_log.entries()[0].event {
            LogEvent::StartTask { status, error, .. } => {
                assert_eq!(*status, EntryStatus::Failed);
                assert!(error.as_deref().unwrap().contains("scripts/a.py"));
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }
}
