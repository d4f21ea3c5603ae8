//! In-memory process host for scheduler tests.

use etl_common::{ProcessError, ProcessResult};
use etl_process::{
    LaunchSpec, ProcessEntry, ProcessSignal, ProcessTable, SignalError, Signaller, Spawner,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// How a fake process reacts to signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Exits on SIGTERM.
    Graceful,
    /// Survives SIGTERM, dies on SIGKILL.
    Stubborn,
    /// Owned by another user: every signal but the probe is refused.
    Protected,
    /// Listed in the table, but exits before the first signal arrives.
    Vanishing,
}

#[derive(Debug)]
struct FakeProcess {
    argv: Vec<String>,
    behaviour: Behaviour,
}

#[derive(Debug, Default)]
struct State {
    next_pid: u32,
    processes: BTreeMap<u32, FakeProcess>,
    spawned: Vec<LaunchSpec>,
    signals: Vec<(u32, ProcessSignal)>,
    failing_spawns: Vec<String>,
    table_broken: bool,
}

#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_pid: 10_000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_process(&self, pid: u32, argv: &[&str]) {
        self.add_process_with(pid, argv, Behaviour::Graceful);
    }

    pub fn add_process_with(&self, pid: u32, argv: &[&str], behaviour: Behaviour) {
        self.state().processes.insert(
            pid,
            FakeProcess {
                argv: argv.iter().map(|a| a.to_string()).collect(),
                behaviour,
            },
        );
    }

    /// The process exits on its own.
    pub fn remove_process(&self, pid: u32) {
        self.state().processes.remove(&pid);
    }

    /// Make spawns whose argv contains `arg` fail.
    pub fn fail_spawn(&self, arg: &str) {
        self.state().failing_spawns.push(arg.to_string());
    }

    /// Make every process table snapshot fail.
    pub fn break_table(&self) {
        self.state().table_broken = true;
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.state().processes.contains_key(&pid)
    }

    pub fn spawned(&self) -> Vec<LaunchSpec> {
        self.state().spawned.clone()
    }

    /// Signals other than liveness probes, in send order.
    pub fn delivered(&self) -> Vec<(u32, ProcessSignal)> {
        self.state()
            .signals
            .iter()
            .filter(|(_, signal)| *signal != ProcessSignal::Probe)
            .copied()
            .collect()
    }
}

impl ProcessTable for FakeHost {
    fn snapshot(&self) -> ProcessResult<Vec<ProcessEntry>> {
        let state = self.state();
        if state.table_broken {
            return Err(ProcessError::inspection("process table unavailable"));
        }
        Ok(state
            .processes
            .iter()
            .map(|(pid, process)| ProcessEntry::new(*pid, process.argv.clone()))
            .collect())
    }
}

impl Spawner for FakeHost {
    fn spawn(&self, spec: &LaunchSpec) -> ProcessResult<u32> {
        let mut state = self.state();
        let argv = spec.argv();
        if argv
            .iter()
            .any(|arg| state.failing_spawns.iter().any(|f| f == arg))
        {
            return Err(ProcessError::spawn_failed(
                argv.join(" "),
                "No such file or directory",
            ));
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        state.spawned.push(spec.clone());
        state.processes.insert(
            pid,
            FakeProcess {
                argv,
                behaviour: Behaviour::Graceful,
            },
        );
        Ok(pid)
    }
}

impl Signaller for FakeHost {
    fn send(&self, pid: u32, signal: ProcessSignal) -> Result<(), SignalError> {
        let mut state = self.state();
        state.signals.push((pid, signal));

        let Some(behaviour) = state.processes.get(&pid).map(|p| p.behaviour) else {
            return Err(SignalError::NoSuchProcess);
        };

        match (signal, behaviour) {
            (_, Behaviour::Vanishing) => {
                state.processes.remove(&pid);
                Err(SignalError::NoSuchProcess)
            }
            (ProcessSignal::Probe, _) => Ok(()),
            (_, Behaviour::Protected) => Err(SignalError::PermissionDenied),
            (ProcessSignal::Terminate, Behaviour::Stubborn) => Ok(()),
            (ProcessSignal::Terminate, Behaviour::Graceful) | (ProcessSignal::Kill, _) => {
                state.processes.remove(&pid);
                Ok(())
            }
        }
    }
}
