//! Per-stage attempt state machine with legal transition guards.
//!
//! ```text
//! Pending  → Running | Cancelled
//! Running  → Succeeded | Failed | Cancelled
//! Failed   → Running (retry) | Terminal | Cancelled
//! ```
//! `Succeeded`, `Terminal` and `Cancelled` are terminal. Every accepted
//! transition is appended to the log; rejected ones return
//! [`TransitionError`] and leave the machine untouched.

use crate::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Terminal,
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Terminal | Self::Cancelled)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Terminal => write!(f, "Terminal"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

fn is_legal_transition(from: AttemptState, to: AttemptState) -> bool {
    use AttemptState::*;

    if to == Cancelled && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Pending, Running)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Failed, Running)
            | (Failed, Terminal)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub stage: Stage,
    pub from: AttemptState,
    pub to: AttemptState,
    /// Attempt index after the transition
    pub attempt_index: u32,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition for {stage}: {from} -> {to}")]
pub struct TransitionError {
    pub stage: Stage,
    pub from: AttemptState,
    pub to: AttemptState,
}

/// Attempt tracking for a single stage.
#[derive(Debug, Clone)]
pub struct StageMachine {
    stage: Stage,
    current: AttemptState,
    attempt_index: u32,
    transitions: Vec<TransitionRecord>,
}

impl StageMachine {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            current: AttemptState::Pending,
            attempt_index: 0,
            transitions: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn current(&self) -> AttemptState {
        self.current
    }

    pub fn attempt_index(&self) -> u32 {
        self.attempt_index
    }

    pub(crate) fn set_attempt_index(&mut self, attempt_index: u32) {
        self.attempt_index = attempt_index;
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn advance(&mut self, to: AttemptState, reason: Option<&str>) -> Result<(), TransitionError> {
        if !is_legal_transition(self.current, to) {
            return Err(TransitionError {
                stage: self.stage,
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            stage = %self.stage,
            from = %self.current,
            to = %to,
            attempt = self.attempt_index,
            "Attempt transition"
        );

        self.transitions.push(TransitionRecord {
            stage: self.stage,
            from: self.current,
            to,
            attempt_index: self.attempt_index,
            at: Utc::now(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }
}
