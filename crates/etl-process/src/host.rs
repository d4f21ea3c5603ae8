//! The full set of process capabilities the scheduler needs.

use crate::execute::{LaunchSpec, Spawner, SystemSpawner};
use crate::inspect::{ProcessEntry, ProcessTable, SystemProcessTable};
use crate::terminate::{ProcessSignal, SignalError, Signaller, SystemSignaller};
use etl_common::ProcessResult;

/// Everything the scheduler does to OS processes: look, spawn, signal.
pub trait ProcessHost: ProcessTable + Spawner + Signaller {}

impl<T: ProcessTable + Spawner + Signaller> ProcessHost for T {}

/// The real operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses {
    table: SystemProcessTable,
    spawner: SystemSpawner,
    signaller: SystemSignaller,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessTable for SystemProcesses {
    fn snapshot(&self) -> ProcessResult<Vec<ProcessEntry>> {
        self.table.snapshot()
    }
}

impl Spawner for SystemProcesses {
    fn spawn(&self, spec: &LaunchSpec) -> ProcessResult<u32> {
        self.spawner.spawn(spec)
    }
}

impl Signaller for SystemProcesses {
    fn send(&self, pid: u32, signal: ProcessSignal) -> Result<(), SignalError> {
        self.signaller.send(pid, signal)
    }
}

impl<T: ProcessTable + ?Sized> ProcessTable for &T {
    fn snapshot(&self) -> ProcessResult<Vec<ProcessEntry>> {
        (**self).snapshot()
    }
}

impl<T: Spawner + ?Sized> Spawner for &T {
    fn spawn(&self, spec: &LaunchSpec) -> ProcessResult<u32> {
        (**self).spawn(spec)
    }
}

impl<T: Signaller + ?Sized> Signaller for &T {
    fn send(&self, pid: u32, signal: ProcessSignal) -> Result<(), SignalError> {
        (**self).send(pid, signal)
    }
}
