use chrono::{DateTime, Utc};
use fwbench_common::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_HISTORY: usize = 100;

/// States a framework run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Nothing leased, nothing running
    Idle,
    /// Clearing leftovers from the port
    PortFreeing,
    /// Resolving the start command and launching it
    Spawning,
    /// Settling, then the single readiness check
    AwaitingReadiness,
    /// Server confirmed listening on its port
    Ready,
    /// External load generator running against the server
    LoadTesting,
    /// Killing the server and freeing the port again
    Stopping,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::PortFreeing => write!(f, "port_freeing"),
            RunnerState::Spawning => write!(f, "spawning"),
            RunnerState::AwaitingReadiness => write!(f, "awaiting_readiness"),
            RunnerState::Ready => write!(f, "ready"),
            RunnerState::LoadTesting => write!(f, "load_testing"),
            RunnerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Represents a state transition with timestamp and optional reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: RunnerState,
    pub to_state: RunnerState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    /// Set on the transition back to `Idle` that ends a failed run.
    pub failed: bool,
}

/// Validated state machine for one framework runner.
#[derive(Debug, Clone)]
pub struct RunnerStateMachine {
    runner_id: String,
    current_state: RunnerState,
    previous_state: Option<RunnerState>,
    state_history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
    runs_completed: usize,
    runs_failed: usize,
}

impl RunnerStateMachine {
    pub fn new(runner_id: &str) -> Self {
        Self {
            runner_id: runner_id.to_string(),
            current_state: RunnerState::Idle,
            previous_state: None,
            state_history: Vec::new(),
            last_transition_time: Utc::now(),
            runs_completed: 0,
            runs_failed: 0,
        }
    }

    pub fn current_state(&self) -> RunnerState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<RunnerState> {
        self.previous_state
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    pub fn runs_completed(&self) -> usize {
        self.runs_completed
    }

    pub fn runs_failed(&self) -> usize {
        self.runs_failed
    }

    /// Check if a transition from the current state to `target_state` is valid
    pub fn is_valid_transition(&self, target_state: RunnerState) -> bool {
        use RunnerState::*;

        matches!(
            (self.current_state, target_state),
            (Idle, PortFreeing)
                | (PortFreeing, Spawning)
                | (PortFreeing, Idle)
                | (Spawning, AwaitingReadiness)
                | (Spawning, Idle)
                // A failed readiness check still has a process to clean up
                | (AwaitingReadiness, Ready)
                | (AwaitingReadiness, Stopping)
                | (Ready, LoadTesting)
                | (Ready, Stopping)
                | (LoadTesting, Stopping)
                | (Stopping, Idle)
        )
    }

    fn transition(&mut self, target_state: RunnerState, reason: Option<String>, failed: bool) -> ProcessResult<()> {
        if !self.is_valid_transition(target_state) {
            return Err(ProcessError::invalid_state(
                &self.runner_id,
                format!("transition to {}", target_state),
                self.current_state.to_string(),
            ));
        }

        let now = Utc::now();
        self.state_history.push(StateTransition {
            from_state: self.current_state,
            to_state: target_state,
            timestamp: now,
            reason,
            failed,
        });
        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        self.previous_state = Some(self.current_state);
        self.current_state = target_state;
        self.last_transition_time = now;

        if target_state == RunnerState::Idle {
            if failed {
                self.runs_failed += 1;
            } else {
                self.runs_completed += 1;
            }
        }

        tracing::debug!(
            "Runner {} transitioned from {} to {}",
            self.runner_id,
            self.previous_state.unwrap_or(RunnerState::Idle),
            self.current_state
        );

        Ok(())
    }

    /// Transition to a new state with optional reason
    pub fn transition_to(&mut self, target_state: RunnerState, reason: Option<String>) -> ProcessResult<()> {
        self.transition(target_state, reason, false)
    }

    /// Return to `Idle` marking the run as failed.
    pub fn fail_to_idle(&mut self, reason: impl Into<String>) -> ProcessResult<()> {
        self.transition(RunnerState::Idle, Some(reason.into()), true)
    }

    /// Failure reason of the most recent run, if it failed.
    pub fn last_failure(&self) -> Option<&str> {
        self.state_history
            .last()
            .filter(|t| t.failed)
            .and_then(|t| t.reason.as_deref())
    }

    /// Count transitions to a specific state
    pub fn count_transitions_to(&self, state: RunnerState) -> usize {
        self.state_history.iter().filter(|t| t.to_state == state).count()
    }
}
