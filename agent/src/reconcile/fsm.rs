//! Finite state machine of a single container action

use serde::{Deserialize, Serialize};

/// Action state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Running,
    Succeeded,
    Failed,

    /// Never attempted
    Skipped,
}

/// Action event
#[derive(Debug, Clone)]
pub enum ActionEvent {
    /// Start an attempt
    Begin,

    Succeed,

    Fail(String),

    /// A prerequisite failed; the action cannot run
    Block(String),

    /// The cycle was cancelled before the action started
    Skip,
}

/// Action FSM
#[derive(Debug, Clone)]
pub struct ActionFsm {
    state: ActionState,
    error: Option<String>,
    attempts: u32,
}

impl ActionFsm {
    pub fn new() -> Self {
        Self {
            state: ActionState::Pending,
            error: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Error of the last failed attempt
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ActionEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            (ActionState::Pending, ActionEvent::Begin) | (ActionState::Failed, ActionEvent::Begin) => {
                self.attempts += 1;
                ActionState::Running
            }
            (ActionState::Pending, ActionEvent::Block(reason)) => {
                self.error = Some(reason.clone());
                ActionState::Failed
            }
            (ActionState::Pending, ActionEvent::Skip) => ActionState::Skipped,

            (ActionState::Running, ActionEvent::Succeed) => {
                self.error = None;
                ActionState::Succeeded
            }
            (ActionState::Running, ActionEvent::Fail(err)) => {
                self.error = Some(err.clone());
                ActionState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Check if the action can be attempted again
    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.state == ActionState::Failed && self.attempts > 0 && self.attempts < max_attempts
    }
}

impl Default for ActionFsm {
    fn default() -> Self {
        Self::new()
    }
}
