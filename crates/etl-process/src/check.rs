//! Process existence checking.

use etl_common::ProcessResult;

/// Check if a process with the given PID exists.
///
/// On Unix this uses `kill(pid, 0)`, which delivers nothing but reports
/// whether the PID could be signalled. A process we may not signal still
/// exists, so `EPERM` counts as alive.
///
/// # Returns
///
/// * `Ok(true)` - Process exists
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - The check itself failed
///
/// # Examples
///
/// ```rust,no_run
/// use etl_process::process_exists;
///
/// if process_exists(1234).unwrap_or(false) {
///     println!("Process 1234 is running");
/// }
/// ```
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        process_exists_unix(pid)
    }

    #[cfg(not(unix))]
    {
        process_exists_sysinfo(pid)
    }
}

#[cfg(unix)]
fn process_exists_unix(pid: u32) -> ProcessResult<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| etl_common::ProcessError::Configuration {
        id: pid.to_string(),
        reason: "PID out of range".to_string(),
    })?;

    match kill(Pid::from_raw(raw), None) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(etl_common::ProcessError::Configuration {
            id: pid.to_string(),
            reason: format!("Failed to check process: {}", e),
        }),
    }
}

#[cfg(not(unix))]
fn process_exists_sysinfo(pid: u32) -> ProcessResult<bool> {
    use sysinfo::{Pid, System};

    let mut system = System::new();
    Ok(system.refresh_process(Pid::from_u32(pid)))
}
