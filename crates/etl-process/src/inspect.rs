//! Process table inspection.
//!
//! Tasks are not owned by the scheduler once launched, so "is it running?"
//! is always answered by scanning the OS process table and matching command
//! lines. The matching rules live in [`TaskPattern`]; the scanning strategy
//! lives behind [`ProcessTable`] so tests can substitute a fixed table.

use etl_common::{ProcessError, ProcessResult};
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Command line split into arguments; `argv[0]` is the program.
    pub argv: Vec<String>,
}

impl ProcessEntry {
    pub fn new(pid: u32, argv: Vec<String>) -> Self {
        Self { pid, argv }
    }
}

/// Source of process table snapshots.
pub trait ProcessTable {
    /// List the processes currently visible to this user.
    fn snapshot(&self) -> ProcessResult<Vec<ProcessEntry>>;
}

/// Process table backed by the operating system.
///
/// Enumerates processes through `sysinfo` and falls back to parsing
/// `ps -eo pid=,args=` when that returns nothing (restricted `/proc`,
/// unsupported platform).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }

    fn snapshot_sysinfo(&self) -> Vec<ProcessEntry> {
        use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};

        let refresh = RefreshKind::new()
            .with_processes(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));
        let mut system = System::new();
        system.refresh_specifics(refresh);

        system
            .processes()
            .iter()
            // Linux threads show up as their own entries; only keep thread group leaders.
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessEntry::new(pid.as_u32(), process.cmd().to_vec()))
            .filter(|entry| !entry.argv.is_empty())
            .collect()
    }

    fn snapshot_ps(&self) -> ProcessResult<Vec<ProcessEntry>> {
        let output = Command::new("ps")
            .args(["-eo", "pid=,args="])
            .output()
            .map_err(|e| ProcessError::inspection(format!("Failed to run ps: {}", e)))?;

        if !output.status.success() {
            return Err(ProcessError::inspection(format!(
                "ps exited with {}",
                output.status
            )));
        }

        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> ProcessResult<Vec<ProcessEntry>> {
        let entries = self.snapshot_sysinfo();
        if !entries.is_empty() {
            return Ok(entries);
        }

        debug!("sysinfo returned an empty process table, falling back to ps");
        self.snapshot_ps()
    }
}

/// Parse `ps -eo pid=,args=` output into entries.
///
/// Arguments are split on whitespace, which loses quoting but keeps every
/// path-like argument intact enough for base-name matching.
pub(crate) fn parse_ps_output(text: &str) -> Vec<ProcessEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse::<u32>().ok()?;
            let argv: Vec<String> = parts.map(str::to_string).collect();
            if argv.is_empty() {
                None
            } else {
                Some(ProcessEntry::new(pid, argv))
            }
        })
        .collect()
}

/// Command-line pattern that identifies a task's processes.
///
/// A process matches when one of its arguments has exactly `base_name` as its
/// file name, so `extract` never matches `extract_v2` or `/opt/extract.bak`.
/// When an interpreter is set, `argv[0]` must also name that interpreter and
/// the base name must appear after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPattern {
    base_name: String,
    interpreter: Option<String>,
    executable_only: bool,
}

impl TaskPattern {
    /// Pattern for a task launched from `path`, optionally through `interpreter`.
    pub fn for_path(path: &str, interpreter: Option<&str>) -> Self {
        Self {
            base_name: file_name_of(path).to_string(),
            interpreter: interpreter.map(|i| file_name_of(i).to_string()),
            executable_only: false,
        }
    }

    /// Pattern matching processes whose executable (`argv[0]`) is the named
    /// program. Arguments are ignored, so `cargo test -p etl-scheduler` is
    /// not an `etl-scheduler` process.
    pub fn program(name: &str) -> Self {
        Self {
            base_name: file_name_of(name).to_string(),
            interpreter: None,
            executable_only: true,
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn matches(&self, argv: &[String]) -> bool {
        let Some(program) = argv.first() else {
            return false;
        };

        if self.executable_only {
            return file_name_of(program) == self.base_name;
        }

        match &self.interpreter {
            Some(interpreter) => {
                file_name_of(program) == interpreter
                    && argv[1..].iter().any(|arg| file_name_of(arg) == self.base_name)
            }
            None => argv.iter().any(|arg| file_name_of(arg) == self.base_name),
        }
    }
}

fn file_name_of(arg: &str) -> &str {
    Path::new(arg)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(arg)
}

/// Answers "which processes belong to this task?" against a [`ProcessTable`].
#[derive(Debug, Clone)]
pub struct ProcessInspector<T> {
    table: T,
}

impl<T: ProcessTable> ProcessInspector<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    /// Whether any process matches `pattern`.
    ///
    /// Inspection failures read as "not running": callers must tolerate a
    /// false negative (and therefore a possible duplicate launch).
    pub fn is_running(&self, pattern: &TaskPattern) -> bool {
        match self.table.snapshot() {
            Ok(entries) => entries.iter().any(|entry| pattern.matches(&entry.argv)),
            Err(e) => {
                warn!("Process inspection failed for {}: {}", pattern.base_name(), e);
                false
            }
        }
    }

    /// PIDs of every process matching `pattern`, minus `exclude_pid`.
    pub fn find_pids(&self, pattern: &TaskPattern, exclude_pid: u32) -> ProcessResult<Vec<u32>> {
        self.find_pids_where(pattern, exclude_pid, |_| true)
    }

    /// Like [`find_pids`](Self::find_pids) with an extra per-entry filter.
    pub fn find_pids_where<F>(
        &self,
        pattern: &TaskPattern,
        exclude_pid: u32,
        filter: F,
    ) -> ProcessResult<Vec<u32>>
    where
        F: Fn(&ProcessEntry) -> bool,
    {
        let mut pids: Vec<u32> = self
            .table
            .snapshot()?
            .into_iter()
            .filter(|entry| entry.pid != exclude_pid)
            .filter(|entry| pattern.matches(&entry.argv))
            .filter(|entry| filter(entry))
            .map(|entry| entry.pid)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }
}
