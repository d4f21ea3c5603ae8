//! End-to-end: drive the real binary against a throwaway shell task.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn scheduler_bin() -> &'static str {
    env!("CARGO_BIN_EXE_etl-scheduler")
}

/// Run the scheduler to completion. Output goes to files so the launched
/// task cannot hold our pipes open.
fn run_scheduler(dir: &Path, config: &Path, args: &[&str]) -> bool {
    let out = fs::File::create(dir.join("scheduler.out")).unwrap();
    let err = out.try_clone().unwrap();

    let status = Command::new(scheduler_bin())
        .arg("--config")
        .arg(config)
        .args(args)
        .current_dir(dir)
        .env_remove("ETL_SCHEDULER_CONFIG")
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .status()
        .unwrap();

    println!(
        "etl-scheduler {:?}: {}\n{}",
        args,
        status,
        fs::read_to_string(dir.join("scheduler.out")).unwrap_or_default()
    );
    status.success()
}

/// All Run Log entries written so far, in write order.
fn run_log_entries(log_dir: &Path) -> Vec<serde_json::Value> {
    let mut files: Vec<PathBuf> = Vec::new();
    if let Ok(days) = fs::read_dir(log_dir.join("scheduler")) {
        for day in days {
            for file in fs::read_dir(day.unwrap().path()).unwrap() {
                files.push(file.unwrap().path());
            }
        }
    }
    files.sort();

    files
        .iter()
        .flat_map(|path| {
            let value: serde_json::Value =
                serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
            value["log_messages"].as_array().cloned().unwrap_or_default()
        })
        .collect()
}

// Zombies count as gone: the container's init may never reap them.
fn pid_alive(pid: u64) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

fn wait_until_gone(pid: u64, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !pid_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn test_start_once_then_stop() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("logs");

    // Unique name so unrelated processes never match; the trailing `exit`
    // keeps the shell from exec'ing into `sleep`.
    let script = dir
        .path()
        .join(format!("etl_e2e_task_{}.sh", std::process::id()));
    fs::write(&script, "sleep 30\nexit 0\n").unwrap();

    let config = dir.path().join("scheduler.yaml");
    fs::write(
        &config,
        format!(
            concat!(
                "scheduler:\n",
                "  start_delay_seconds: 0\n",
                "  log_dir: {}\n",
                "  interpreter: sh\n",
                "  stop:\n",
                "    timeout: 10s\n",
                "jobs:\n",
                "  e2e_task:\n",
                "    frequency: hourly\n",
                "    path: {}\n",
            ),
            log_dir.display(),
            script.display()
        ),
    )
    .unwrap();

    // Nothing running yet: the task is reported as not running.
    assert!(run_scheduler(dir.path(), &config, &["stop"]));
    let entries = run_log_entries(&log_dir);
    let not_running: Vec<_> = entries
        .iter()
        .filter(|e| e["action"] == "stop_task" && e["reason"] == "not_running")
        .collect();
    assert_eq!(not_running.len(), 1);

    // Startup pass launches the task and exits.
    assert!(run_scheduler(dir.path(), &config, &["--once"]));
    let entries = run_log_entries(&log_dir);
    let started = entries
        .iter()
        .find(|e| e["action"] == "start_task" && e["task_name"] == "e2e_task")
        .expect("start_task entry");
    assert_eq!(started["status"], "success");
    let pid = started["pid"].as_u64().unwrap();
    assert!(pid_alive(pid), "task process {} should be running", pid);
    assert!(entries.iter().any(|e| e["action"] == "schedule_task"));

    // A second startup pass sees the task and skips it.
    assert!(run_scheduler(dir.path(), &config, &["--once"]));
    let entries = run_log_entries(&log_dir);
    assert!(entries
        .iter()
        .any(|e| e["action"] == "skip_task" && e["reason"] == "already_running"));

    // Stop terminates it.
    assert!(run_scheduler(dir.path(), &config, &["stop"]));
    let entries = run_log_entries(&log_dir);
    let stopped: Vec<_> = entries
        .iter()
        .filter(|e| e["action"] == "stop_task" && e["status"] == "success")
        .collect();
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0]["pid"].as_u64(), Some(pid));
    assert!(wait_until_gone(pid, Duration::from_secs(5)));

    let summary = entries
        .iter()
        .rev()
        .find(|e| e["action"] == "stop_scheduler" && e["status"] == "finished")
        .expect("stop summary");
    assert_eq!(summary["tasks_stopped"], 1);
    assert_eq!(summary["tasks_failed"], 0);
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("scheduler.yaml");
    fs::write(&config, "jobs: {}\n").unwrap();

    assert!(!run_scheduler(dir.path(), &config, &["--once"]));
}
