//! Retry coordinator
//!
//! Owns one [`StageMachine`] per stage and turns classified failures into
//! [`RetryDecision`]s. A failed stage is re-run only while
//! `attempt_index < max_retries` and either a fix was applied or the failure
//! is transient. Fatal records end the stage immediately.

use crate::context::types::StageResult;
use crate::healing::record::{ErrorKind, ErrorRecord};
use crate::retry::policy::RetryPolicy;
use crate::retry::state::{AttemptState, StageMachine, TransitionError, TransitionRecord};
use crate::stage::{Stage, StageStatus};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        /// Index the next attempt will run with
        attempt_index: u32,
        delay: Duration,
        reason: String,
    },
    Terminal {
        reason: String,
    },
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Retry { reason, .. } | Self::Terminal { reason } => reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    machines: HashMap<Stage, StageMachine>,
    transient_retries: HashMap<Stage, u32>,
    decisions: HashMap<Stage, RetryDecision>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            machines: HashMap::new(),
            transient_retries: HashMap::new(),
            decisions: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn machine(&mut self, stage: Stage) -> &mut StageMachine {
        self.machines
            .entry(stage)
            .or_insert_with(|| StageMachine::new(stage))
    }

    pub fn state(&self, stage: Stage) -> AttemptState {
        self.machines
            .get(&stage)
            .map(|m| m.current())
            .unwrap_or(AttemptState::Pending)
    }

    pub fn attempt_index(&self, stage: Stage) -> u32 {
        self.machines
            .get(&stage)
            .map(|m| m.attempt_index())
            .unwrap_or(0)
    }

    /// Decision taken on the stage's most recent failure, if any.
    pub fn last_decision(&self, stage: Stage) -> Option<&RetryDecision> {
        self.decisions.get(&stage)
    }

    /// All transitions across stages in the order they happened.
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        let mut all: Vec<TransitionRecord> = self
            .machines
            .values()
            .flat_map(|m| m.transitions().iter().cloned())
            .collect();
        all.sort_by(|a, b| a.at.cmp(&b.at).then(a.stage.cmp(&b.stage)));
        all
    }

    /// Start an attempt. Returns the attempt index it runs with.
    pub fn begin(&mut self, stage: Stage) -> Result<u32, TransitionError> {
        let machine = self.machine(stage);
        let reason = (machine.current() == AttemptState::Failed)
            .then(|| format!("retry #{}", machine.attempt_index()));
        machine.advance(AttemptState::Running, reason.as_deref())?;
        Ok(machine.attempt_index())
    }

    pub fn record_success(&mut self, stage: Stage) -> Result<(), TransitionError> {
        self.machine(stage).advance(AttemptState::Succeeded, None)?;
        self.decisions.remove(&stage);
        Ok(())
    }

    /// Record a failed attempt and decide what happens next.
    ///
    /// On `Retry` the stage stays `Failed` with the next attempt index
    /// reserved; `begin` moves it back to `Running`. On `Terminal` the stage
    /// is closed.
    pub fn on_failure(
        &mut self,
        stage: Stage,
        record: &ErrorRecord,
    ) -> Result<RetryDecision, TransitionError> {
        let max_retries = self.policy.max_retries;
        let backoff = self.policy.transient_backoff;
        let transient_so_far = self.transient_retries.get(&stage).copied().unwrap_or(0);

        let machine = self.machine(stage);
        let kind = record.kind.to_string();
        machine.advance(AttemptState::Failed, Some(&kind))?;
        let attempt = machine.attempt_index();

        let decision = if record.fatal {
            RetryDecision::Terminal {
                reason: format!("{} is fatal", record.kind),
            }
        } else if !record.auto_fix_applied && record.kind != ErrorKind::Transient {
            RetryDecision::Terminal {
                reason: format!("no applicable fix for {}", record.kind),
            }
        } else if attempt >= max_retries {
            RetryDecision::Terminal {
                reason: format!("retry budget exhausted after {attempt} retries"),
            }
        } else if record.auto_fix_applied {
            RetryDecision::Retry {
                attempt_index: attempt + 1,
                delay: Duration::ZERO,
                reason: record
                    .fix_description
                    .clone()
                    .unwrap_or_else(|| "fix applied".to_string()),
            }
        } else {
            RetryDecision::Retry {
                attempt_index: attempt + 1,
                delay: backoff.delay(transient_so_far + 1),
                reason: "transient failure".to_string(),
            }
        };

        match &decision {
            RetryDecision::Retry {
                attempt_index,
                delay,
                reason,
            } => {
                machine.set_attempt_index(*attempt_index);
                if !record.auto_fix_applied {
                    *self.transient_retries.entry(stage).or_insert(0) += 1;
                }
                info!(
                    stage = %stage,
                    attempt = attempt_index,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "Retrying stage"
                );
            }
            RetryDecision::Terminal { reason } => {
                machine.advance(AttemptState::Terminal, Some(reason))?;
                warn!(stage = %stage, attempt, %reason, "Stage failed terminally");
            }
        }

        self.decisions.insert(stage, decision.clone());
        Ok(decision)
    }

    pub fn cancel(&mut self, stage: Stage) -> Result<(), TransitionError> {
        self.machine(stage)
            .advance(AttemptState::Cancelled, Some("cancellation requested"))
    }

    /// Rebuild attempt state from a persisted history by replaying every
    /// completed attempt. Failure decisions are recomputed from the stored
    /// records, so a resumed run takes the same path as the original.
    pub fn from_history(policy: RetryPolicy, history: &[StageResult]) -> Result<Self, TransitionError> {
        let mut coordinator = Self::new(policy);
        for result in history {
            let stage = result.stage;
            match result.status {
                StageStatus::Success => {
                    coordinator.begin_at(stage, result.attempt_index)?;
                    coordinator.record_success(stage)?;
                }
                StageStatus::Failed => {
                    coordinator.begin_at(stage, result.attempt_index)?;
                    let record = result.error.clone().unwrap_or_else(|| {
                        ErrorRecord::unknown(stage, result.output.clone().unwrap_or_default())
                    });
                    coordinator.on_failure(stage, &record)?;
                }
                // a cancellation ends the run, not the stage; a resume picks
                // the stage up from where it stood
                StageStatus::Cancelled
                | StageStatus::Skipped
                | StageStatus::Pending
                | StageStatus::Running => {}
            }
        }
        Ok(coordinator)
    }

    fn begin_at(&mut self, stage: Stage, attempt_index: u32) -> Result<(), TransitionError> {
        self.begin(stage)?;
        // trust the recorded index if it disagrees with the replay
        let machine = self.machine(stage);
        if machine.attempt_index() != attempt_index {
            machine.set_attempt_index(attempt_index);
        }
        Ok(())
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
