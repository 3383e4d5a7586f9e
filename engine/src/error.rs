//! Error taxonomy
//!
//! [`PipelineError`] is the terminal failure a workflow surfaces once the
//! fix-and-retry budget is spent. Each variant knows the stage it belongs to,
//! whether it ends the workflow, and the next step to suggest.

use crate::context::types::WorkflowId;
use crate::network::UnsupportedNetwork;
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type ContextResult<T> = Result<T, ContextError>;

/// Errors from context persistence.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Workflow {id} not found")]
    NotFound { id: WorkflowId },

    /// Finalized contexts accept no further changes
    #[error("Workflow {id} is finalized")]
    Finalized { id: WorkflowId },

    #[error("Diagnostic bundle for {id} already written")]
    BundleExists { id: WorkflowId },

    #[error("Corrupt state file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal workflow failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Dependency resolution failed: {message}")]
    DependencyResolution { message: String },

    #[error("Compilation failed: {message}")]
    Compilation { message: String },

    /// The auditor itself failed; distinct from a finding
    #[error("Audit tool failed: {message}")]
    AuditTool { message: String },

    /// Findings at or above the blocking severity without an override
    #[error("Audit blocked: {count} high-severity finding(s)")]
    AuditBlocked { count: usize },

    #[error("Deployment failed: {message}")]
    Deployment { message: String },

    #[error("Verification failed: {message}")]
    Verification { message: String },

    #[error("Testing failed: {message}")]
    Testing { message: String },

    #[error(transparent)]
    UnsupportedNetwork(#[from] UnsupportedNetwork),

    #[error("Preflight failed: {message}")]
    Preflight { message: String },

    #[error("Input rejected: {message}")]
    Input { message: String },

    #[error("Output failed: {message}")]
    Output { message: String },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    /// Wrap a terminal stage failure in the variant for that stage.
    pub fn for_stage(stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        match stage {
            Stage::Preflight => Self::Preflight { message },
            Stage::InputParsing => Self::Input { message },
            Stage::Generation => Self::Generation { message },
            Stage::DependencyResolution => Self::DependencyResolution { message },
            Stage::Compilation => Self::Compilation { message },
            Stage::Auditing => Self::AuditTool { message },
            Stage::Deployment => Self::Deployment { message },
            Stage::Verification => Self::Verification { message },
            Stage::Testing => Self::Testing { message },
            Stage::Output => Self::Output { message },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Generation { .. } => Stage::Generation,
            Self::DependencyResolution { .. } => Stage::DependencyResolution,
            Self::Compilation { .. } => Stage::Compilation,
            Self::AuditTool { .. } | Self::AuditBlocked { .. } => Stage::Auditing,
            Self::Deployment { .. } => Stage::Deployment,
            Self::Verification { .. } => Stage::Verification,
            Self::Testing { .. } => Stage::Testing,
            Self::UnsupportedNetwork(_) | Self::Preflight { .. } => Stage::Preflight,
            Self::Input { .. } => Stage::InputParsing,
            Self::Output { .. } => Stage::Output,
            Self::Cancelled { stage } => *stage,
        }
    }

    /// Whether the workflow must stop. Only verification failures let the
    /// workflow continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Verification { .. } | Self::Cancelled { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// One actionable next step for the user.
    pub fn suggestion(&self) -> String {
        match self {
            Self::Generation { .. } => {
                "Check the generator endpoint and API key, or rephrase the prompt more concretely.".into()
            }
            Self::DependencyResolution { .. } => {
                "Check network access to GitHub and the library cache directory, then rerun.".into()
            }
            Self::Compilation { .. } => {
                "Inspect the compiler error in the diagnostic bundle and fix the generated source by hand.".into()
            }
            Self::AuditTool { .. } => {
                "Make sure the static analyzer is installed and runs against the project directory.".into()
            }
            Self::AuditBlocked { .. } => {
                "Review the high-severity findings; rerun with --allow-insecure only if they are accepted risks.".into()
            }
            Self::Deployment { .. } => {
                "Check the RPC endpoint, deployer balance and constructor arguments.".into()
            }
            Self::Verification { .. } => {
                "Verify the contract manually on the explorer or check the explorer API key.".into()
            }
            Self::Testing { .. } => "Run the test suite locally to see the failing cases.".into(),
            Self::UnsupportedNetwork(e) => format!("Use one of: {}.", e.allowed),
            Self::Preflight { .. } => {
                "Install the missing tools (forge, slither) and check the state directories.".into()
            }
            Self::Input { .. } => "Describe the contract to build, e.g. \"create ERC20 token\".".into(),
            Self::Output { .. } => "Check that the work directory is writable.".into(),
            Self::Cancelled { .. } => "Resume the workflow to continue from where it stopped.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn test_unsupported_network_fails_at_preflight() {
        let err: PipelineError = "mainnet".parse::<Network>().unwrap_err().into();
        assert_eq!(err.stage(), Stage::Preflight);
        assert!(err.is_fatal());
        assert!(err.suggestion().contains("sepolia"));
        assert!(err.to_string().contains("mainnet"));
    }

    #[test]
    fn test_verification_is_not_fatal() {
        let err = PipelineError::for_stage(Stage::Verification, "explorer down");
        assert!(!err.is_fatal());
        assert_eq!(err.stage(), Stage::Verification);
    }

    #[test]
    fn test_audit_blocked_survives_persistence() {
        let err = PipelineError::AuditBlocked { count: 2 };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"error\":\"audit_blocked\""), "{json}");
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert_ne!(back.suggestion(), PipelineError::for_stage(Stage::Auditing, "x").suggestion());
    }

    #[test]
    fn test_for_stage_roundtrips_stage() {
        for stage in Stage::ALL {
            assert_eq!(PipelineError::for_stage(stage, "x").stage(), stage);
        }
    }
}
