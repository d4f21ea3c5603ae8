//! # ETL Scheduler State
//!
//! Lifecycle of one scheduler process:
//!
//! ```text
//! Idle ──► Starting ──► Running ──► Stopping ──► Stopped
//!   │          │                        ▲
//!   │          └──── (already running) ─┼──────► Stopped
//!   └───────────── (stop command) ──────┘
//! ```
//!
//! Nothing is persisted across process restarts; a fresh scheduler always
//! begins in `Idle`.

use chrono::{DateTime, Utc};
use etl_common::errors::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_HISTORY: usize = 100;

/// Scheduler lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Constructed, nothing executed yet
    Idle,
    /// Launching tasks and registering recurrences
    Starting,
    /// Recurrences registered; due jobs are launched as they come up
    Running,
    /// Terminating task processes
    Stopping,
    /// Finished; the process is about to exit
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Starting => write!(f, "starting"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopping => write!(f, "stopping"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Stopped)
    }

    pub fn is_transitional(&self) -> bool {
        matches!(self, SchedulerState::Starting | SchedulerState::Stopping)
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: SchedulerState,
    pub to_state: SchedulerState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Validates and records scheduler state transitions
#[derive(Debug, Clone)]
pub struct SchedulerStateMachine {
    scheduler_id: String,
    current_state: SchedulerState,
    state_history: Vec<StateTransition>,
}

impl SchedulerStateMachine {
    pub fn new(scheduler_id: &str) -> Self {
        Self {
            scheduler_id: scheduler_id.to_string(),
            current_state: SchedulerState::Idle,
            state_history: Vec::new(),
        }
    }

    pub fn current_state(&self) -> SchedulerState {
        self.current_state
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    pub fn is_valid_transition(&self, target_state: SchedulerState) -> bool {
        use SchedulerState::*;

        match (self.current_state, target_state) {
            (Idle, Starting) => true,
            (Idle, Stopping) => true,

            (Starting, Running) => true,
            // Singleton collision aborts startup
            (Starting, Stopped) => true,

            (Running, Stopping) => true,

            (Stopping, Stopped) => true,

            (state, target) if state == target => true,

            _ => false,
        }
    }

    pub fn transition_to(
        &mut self,
        target_state: SchedulerState,
        reason: Option<String>,
    ) -> ProcessResult<()> {
        if !self.is_valid_transition(target_state) {
            return Err(ProcessError::invalid_state(
                &self.scheduler_id,
                format!("{:?}", target_state),
                format!("{:?}", self.current_state),
            ));
        }

        if self.current_state == target_state {
            return Ok(());
        }

        let from_state = self.current_state;
        self.state_history.push(StateTransition {
            from_state,
            to_state: target_state,
            timestamp: Utc::now(),
            reason,
        });
        self.current_state = target_state;

        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        tracing::debug!(
            "Scheduler {} transitioned from {:?} to {:?}",
            self.scheduler_id,
            from_state,
            target_state
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_path() {
        let mut sm = SchedulerStateMachine::new("etl-scheduler");
        assert_eq!(sm.current_state(), SchedulerState::Idle);

        sm.transition_to(SchedulerState::Starting, None).unwrap();
        sm.transition_to(SchedulerState::Running, Some("tasks registered".into()))
            .unwrap();
        sm.transition_to(SchedulerState::Stopping, None).unwrap();
        sm.transition_to(SchedulerState::Stopped, None).unwrap();

        assert!(sm.current_state().is_terminal());
        assert_eq!(sm.state_history().len(), 4);
        assert_eq!(
            sm.state_history()[1].reason.as_deref(),
            Some("tasks registered")
        );
    }

    #[test]
    fn test_stop_command_path() {
        let mut sm = SchedulerStateMachine::new("etl-scheduler");
        sm.transition_to(SchedulerState::Stopping, None).unwrap();
        assert!(sm.current_state().is_transitional());
        sm.transition_to(SchedulerState::Stopped, None).unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = SchedulerStateMachine::new("etl-scheduler");
        assert!(!sm.is_valid_transition(SchedulerState::Running));
        assert!(sm.transition_to(SchedulerState::Stopped, None).is_err());

        sm.transition_to(SchedulerState::Starting, None).unwrap();
        sm.transition_to(SchedulerState::Stopped, None).unwrap();
        assert!(sm.transition_to(SchedulerState::Starting, None).is_err());
    }

    #[test]
    fn test_same_state_is_a_no_op() {
        let mut sm = SchedulerStateMachine::new("etl-scheduler");
        sm.transition_to(SchedulerState::Idle, None).unwrap();
        assert!(sm.state_history().is_empty());
    }
}
