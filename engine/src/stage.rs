//! Pipeline stages and per-attempt status

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discrete pipeline step. Variant order is the canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    InputParsing,
    Generation,
    DependencyResolution,
    Compilation,
    Auditing,
    Deployment,
    Verification,
    Testing,
    Output,
}

impl Stage {
    /// Canonical order.
    pub const ALL: [Stage; 10] = [
        Stage::Preflight,
        Stage::InputParsing,
        Stage::Generation,
        Stage::DependencyResolution,
        Stage::Compilation,
        Stage::Auditing,
        Stage::Deployment,
        Stage::Verification,
        Stage::Testing,
        Stage::Output,
    ];

    /// Position in the canonical order.
    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .unwrap_or(Self::ALL.len())
    }

    /// The stage after this one, if any.
    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Stages skipped in `test_only` mode.
    pub fn is_live_network_stage(self) -> bool {
        matches!(
            self,
            Stage::Deployment | Stage::Verification | Stage::Testing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::InputParsing => "input_parsing",
            Self::Generation => "generation",
            Self::DependencyResolution => "dependency_resolution",
            Self::Compilation => "compilation",
            Self::Auditing => "auditing",
            Self::Deployment => "deployment",
            Self::Verification => "verification",
            Self::Testing => "testing",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage attempt as recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl StageStatus {
    /// Whether the stage is done and the pipeline may move past it.
    pub fn is_passing(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        assert!(Stage::Preflight < Stage::Generation);
        assert!(Stage::Compilation < Stage::Auditing);
        assert_eq!(Stage::Auditing.next(), Some(Stage::Deployment));
        assert_eq!(Stage::Output.next(), None);
        assert_eq!(Stage::Compilation.index(), 4);
    }

    #[test]
    fn test_live_network_stages() {
        let live: Vec<_> = Stage::ALL
            .iter()
            .filter(|s| s.is_live_network_stage())
            .collect();
        assert_eq!(
            live,
            vec![&Stage::Deployment, &Stage::Verification, &Stage::Testing]
        );
    }
}
