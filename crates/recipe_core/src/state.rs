//! Execution state machine.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Where an execution is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    NotStarted,
    /// Tool binary installed and verified
    Installed,
    /// Configuration written and credentials injected
    ConfigGenerated,
    /// `init` succeeded
    Initialized,
    /// `apply` succeeded
    Applied,
    /// `destroy` succeeded
    Destroyed,
    /// State backend checked: present after apply, removed after destroy
    Verified,
    Done,
    /// Absorbing failure state
    Failed,
}

impl ExecutionState {
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, next) {
            (Failed | Done, _) => false,
            (_, Failed) => true,
            (NotStarted, Installed)
            | (Installed, ConfigGenerated)
            | (ConfigGenerated, Initialized | Done)
            | (Initialized, Applied | Destroyed)
            | (Applied | Destroyed, Verified)
            | (Verified, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Tracks the current state and every state visited.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    state: ExecutionState,
    history: Vec<ExecutionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ExecutionState::NotStarted,
            history: vec![ExecutionState::NotStarted],
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn history(&self) -> &[ExecutionState] {
        &self.history
    }

    pub fn advance(&mut self, next: ExecutionState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Execution state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed`. Already terminal machines are left alone.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = ExecutionState::Failed;
            self.history.push(ExecutionState::Failed);
        }
    }
}
