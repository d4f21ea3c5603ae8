//! Process spawning.
//!
//! Tasks are launched fire-and-forget: the scheduler never waits on them.
//! The system spawner still reaps each child in a background task so a
//! long-running scheduler does not accumulate zombies.

use etl_common::{ProcessError, ProcessResult};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What to execute for one task launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute (interpreter or the task path itself).
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Launch `path` directly, or through `interpreter` when one is given.
    pub fn for_path(path: &str, interpreter: Option<&str>) -> Self {
        match interpreter {
            Some(interpreter) => Self {
                program: interpreter.to_string(),
                args: vec![path.to_string()],
            },
            None => Self {
                program: path.to_string(),
                args: Vec::new(),
            },
        }
    }

    /// Command line as it will appear in the process table.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Starts processes without waiting for them.
pub trait Spawner {
    /// Spawn the process and return its PID.
    fn spawn(&self, spec: &LaunchSpec) -> ProcessResult<u32>;
}

/// Spawner backed by `tokio::process`.
///
/// Must be called from within a Tokio runtime (the reaper is a Tokio task).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl SystemSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Spawner for SystemSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> ProcessResult<u32> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::spawn_failed(&spec.program, e.to_string()))?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::spawn_failed(&spec.program, "child exited before its PID was read")
        })?;

        info!("Process spawned: {} (PID: {})", spec.argv().join(" "), pid);

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Task process {} exited with {}", pid, status),
                Err(e) => warn!("Failed to reap task process {}: {}", pid, e),
            }
        });

        Ok(pid)
    }
}
