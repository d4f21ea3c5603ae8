//! Process termination.
//!
//! [`Terminator`] sends a graceful termination signal, polls for the
//! process to disappear, and escalates to a forceful kill only if it is
//! still around once the poll budget is spent. It never fails: every way a
//! termination can end is a [`TerminationOutcome`].

use crate::check::process_exists;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Signals the scheduler knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessSignal {
    /// Graceful termination request (SIGTERM).
    Terminate,
    /// Forceful kill (SIGKILL).
    Kill,
    /// Zero-effect liveness probe (signal 0).
    Probe,
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSignal::Terminate => write!(f, "SIGTERM"),
            ProcessSignal::Kill => write!(f, "SIGKILL"),
            ProcessSignal::Probe => write!(f, "signal 0"),
        }
    }
}

/// Why a signal could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    NoSuchProcess,
    PermissionDenied,
    Other(String),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalError::NoSuchProcess => write!(f, "no such process"),
            SignalError::PermissionDenied => write!(f, "permission denied"),
            SignalError::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Delivers signals to processes by PID.
pub trait Signaller {
    fn send(&self, pid: u32, signal: ProcessSignal) -> Result<(), SignalError>;
}

/// Signaller backed by `kill(2)`. Probes go through [`process_exists`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignaller;

impl SystemSignaller {
    pub fn new() -> Self {
        Self
    }
}

impl Signaller for SystemSignaller {
    #[cfg(unix)]
    fn send(&self, pid: u32, signal: ProcessSignal) -> Result<(), SignalError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // PID 0 and negative values address process groups; never do that here.
        let raw = i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .ok_or_else(|| SignalError::Other(format!("invalid PID {}", pid)))?;

        let nix_signal = match signal {
            ProcessSignal::Terminate => Signal::SIGTERM,
            ProcessSignal::Kill => Signal::SIGKILL,
            ProcessSignal::Probe => return probe(pid),
        };

        kill(Pid::from_raw(raw), nix_signal).map_err(|e| match e {
            Errno::ESRCH => SignalError::NoSuchProcess,
            Errno::EPERM => SignalError::PermissionDenied,
            other => SignalError::Other(other.to_string()),
        })
    }

    #[cfg(not(unix))]
    fn send(&self, pid: u32, signal: ProcessSignal) -> Result<(), SignalError> {
        use sysinfo::{Pid, System};

        if signal == ProcessSignal::Probe {
            return probe(pid);
        }

        let mut system = System::new();
        let sys_pid = Pid::from_u32(pid);
        if !system.refresh_process(sys_pid) {
            return Err(SignalError::NoSuchProcess);
        }
        let process = system.process(sys_pid).ok_or(SignalError::NoSuchProcess)?;

        let delivered = match signal {
            ProcessSignal::Probe => true,
            ProcessSignal::Terminate => process
                .kill_with(sysinfo::Signal::Term)
                .unwrap_or_else(|| process.kill()),
            ProcessSignal::Kill => process.kill(),
        };

        if delivered {
            Ok(())
        } else {
            Err(SignalError::Other(format!("failed to deliver {}", signal)))
        }
    }
}

// A process we may not signal still exists, so only "gone" maps to an error.
fn probe(pid: u32) -> Result<(), SignalError> {
    match process_exists(pid) {
        Ok(true) => Ok(()),
        Ok(false) => Err(SignalError::NoSuchProcess),
        Err(e) => Err(SignalError::Other(e.to_string())),
    }
}

/// How a termination attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Exited within the poll window after the graceful signal.
    Exited,
    /// Survived the poll window and was sent the forceful kill.
    Killed,
    /// Already gone when the graceful signal was sent.
    NotFound,
    /// The graceful signal was refused; nothing else was attempted.
    PermissionDenied,
    /// Signal delivery failed for another reason.
    Failed(String),
}

impl TerminationOutcome {
    /// Whether the process is known to have been stopped by this attempt.
    pub fn is_stopped(&self) -> bool {
        matches!(self, TerminationOutcome::Exited | TerminationOutcome::Killed)
    }
}

/// Polling budget for [`Terminator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatorOptions {
    /// Liveness probes after the graceful signal before escalating.
    pub attempts: u32,
    /// Delay before each probe.
    pub poll_interval: Duration,
}

impl Default for TerminatorOptions {
    fn default() -> Self {
        Self {
            attempts: 10,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Graceful-then-forceful process terminator.
#[derive(Debug, Clone)]
pub struct Terminator<S> {
    signaller: S,
    options: TerminatorOptions,
}

impl<S: Signaller> Terminator<S> {
    pub fn new(signaller: S, options: TerminatorOptions) -> Self {
        Self { signaller, options }
    }

    /// Terminate `pid`, escalating to a kill after the poll budget.
    pub async fn terminate(&self, pid: u32) -> TerminationOutcome {
        match self.signaller.send(pid, ProcessSignal::Terminate) {
            Ok(()) => debug!("Sent SIGTERM to PID {}", pid),
            Err(SignalError::NoSuchProcess) => {
                debug!("PID {} was already gone before SIGTERM", pid);
                return TerminationOutcome::NotFound;
            }
            Err(SignalError::PermissionDenied) => {
                warn!("Not permitted to signal PID {}", pid);
                return TerminationOutcome::PermissionDenied;
            }
            Err(SignalError::Other(reason)) => {
                warn!("Failed to send SIGTERM to PID {}: {}", pid, reason);
                return TerminationOutcome::Failed(reason);
            }
        }

        for _ in 0..self.options.attempts {
            tokio::time::sleep(self.options.poll_interval).await;
            let probe = self.signaller.send(pid, ProcessSignal::Probe);
            if let Err(SignalError::NoSuchProcess) = probe {
                info!("Process {} terminated gracefully", pid);
                return TerminationOutcome::Exited;
            }
        }

        warn!(
            "PID {} still alive after {} probes, sending SIGKILL",
            pid, self.options.attempts
        );
        match self.signaller.send(pid, ProcessSignal::Kill) {
            Ok(()) => TerminationOutcome::Killed,
            // Exited between the last probe and the kill.
            Err(SignalError::NoSuchProcess) => TerminationOutcome::Exited,
            Err(SignalError::PermissionDenied) => TerminationOutcome::PermissionDenied,
            Err(SignalError::Other(reason)) => TerminationOutcome::Failed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Signaller whose target dies after a fixed number of probes.
    struct ScriptedSignaller {
        alive_at_start: bool,
        /// `None` means the process ignores SIGTERM.
        probes_until_exit: Option<u32>,
        sent: Mutex<Vec<ProcessSignal>>,
    }

    impl ScriptedSignaller {
        fn new(alive_at_start: bool, probes_until_exit: Option<u32>) -> Self {
            Self {
                alive_at_start,
                probes_until_exit,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn count(&self, signal: ProcessSignal) -> usize {
            self.sent.lock().unwrap().iter().filter(|s| **s == signal).count()
        }
    }

    impl Signaller for ScriptedSignaller {
        fn send(&self, _pid: u32, signal: ProcessSignal) -> Result<(), SignalError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(signal);
            if !self.alive_at_start {
                return Err(SignalError::NoSuchProcess);
            }
            let probes = sent.iter().filter(|s| **s == ProcessSignal::Probe).count() as u32;
            match (signal, self.probes_until_exit) {
                (ProcessSignal::Probe, Some(n)) if probes >= n => Err(SignalError::NoSuchProcess),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_within_window_never_escalates() {
        let signaller = ScriptedSignaller::new(true, Some(3));
        let terminator = Terminator::new(signaller, TerminatorOptions::default());

        assert_eq!(terminator.terminate(4321).await, TerminationOutcome::Exited);
        assert_eq!(terminator.signaller.count(ProcessSignal::Terminate), 1);
        assert_eq!(terminator.signaller.count(ProcessSignal::Probe), 3);
        assert_eq!(terminator.signaller.count(ProcessSignal::Kill), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_survivor_is_killed_exactly_once() {
        let signaller = ScriptedSignaller::new(true, None);
        let terminator = Terminator::new(signaller, TerminatorOptions::default());

        let started = tokio::time::Instant::now();
        assert_eq!(terminator.terminate(4321).await, TerminationOutcome::Killed);
        assert_eq!(terminator.signaller.count(ProcessSignal::Probe), 10);
        assert_eq!(terminator.signaller.count(ProcessSignal::Kill), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_process_is_not_an_error() {
        let signaller = ScriptedSignaller::new(false, None);
        let terminator = Terminator::new(signaller, TerminatorOptions::default());

        assert_eq!(terminator.terminate(4321).await, TerminationOutcome::NotFound);
        assert_eq!(terminator.signaller.count(ProcessSignal::Kill), 0);
        assert_eq!(terminator.signaller.count(ProcessSignal::Probe), 0);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_real_process_exits_on_sigterm() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let reaper = std::thread::spawn(move || {
            let mut child = child;
            child.wait()
        });

        let terminator = Terminator::new(SystemSignaller::new(), TerminatorOptions::default());
        assert_eq!(terminator.terminate(pid).await, TerminationOutcome::Exited);
        assert!(reaper.join().unwrap().is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_real_process_ignoring_sigterm_is_killed() {
        let child = std::process::Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        let pid = child.id();
        let reaper = std::thread::spawn(move || {
            let mut child = child;
            child.wait()
        });

        // Give the shell time to install the trap before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let options = TerminatorOptions {
            attempts: 3,
            poll_interval: Duration::from_millis(50),
        };
        let terminator = Terminator::new(SystemSignaller::new(), options);
        assert_eq!(terminator.terminate(pid).await, TerminationOutcome::Killed);
        assert!(reaper.join().unwrap().is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn test_system_probe_reports_liveness() {
        let signaller = SystemSignaller::new();
        assert_eq!(signaller.send(std::process::id(), ProcessSignal::Probe), Ok(()));

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert_eq!(
            signaller.send(pid, ProcessSignal::Probe),
            Err(SignalError::NoSuchProcess)
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_system_probe_treats_unsignallable_process_as_alive() {
        // PID 1 belongs to root; unprivileged callers get EPERM, root gets Ok.
        assert_eq!(SystemSignaller::new().send(1, ProcessSignal::Probe), Ok(()));
    }

    #[test]
    #[cfg(unix)]
    fn test_system_signaller_refuses_pid_zero() {
        let result = SystemSignaller::new().send(0, ProcessSignal::Probe);
        assert!(matches!(result, Err(SignalError::Other(_))));
    }
}
