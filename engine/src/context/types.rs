//! Workflow context data model

use crate::error::PipelineError;
use crate::healing::record::ErrorRecord;
use crate::network::Network;
use crate::stage::{Stage, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of one workflow execution. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub prompt: String,
    /// Network name as given; validated at Preflight.
    pub network: String,
    #[serde(default)]
    pub test_only: bool,
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default)]
    pub constructor_args: Vec<String>,
}

impl WorkflowRequest {
    pub fn new(prompt: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            network: network.into(),
            test_only: false,
            allow_insecure: false,
            constructor_args: Vec::new(),
        }
    }

    pub fn test_only(mut self, test_only: bool) -> Self {
        self.test_only = test_only;
        self
    }

    pub fn allow_insecure(mut self, allow_insecure: bool) -> Self {
        self.allow_insecure = allow_insecure;
        self
    }
}

/// Record of proceeding past blocking audit findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsecureOverride {
    pub at: DateTime<Utc>,
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Set once Preflight has validated the requested name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    pub test_only: bool,
    pub allow_insecure: bool,
    /// Contract name picked at InputParsing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    /// Tool name → version string, queried at Preflight
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    /// Package/VCS metadata repairs made before dependency installs
    #[serde(default)]
    pub metadata_repairs: Vec<String>,
    #[serde(default)]
    pub insecure_overrides: Vec<InsecureOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRef {
    pub address: String,
    pub tx_hash: String,
    pub network: Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
}

/// Pointers to everything a workflow produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_report: Option<TestSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

/// Outcome of one installed (or already present) library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    pub name: String,
    /// `owner/repo@version`
    pub source_ref: String,
    pub installed: bool,
    /// `prefix=lib/<name>/<subdir>` line for remappings.txt
    pub remapping_entry: String,
    /// Installs attempted by this workflow (0 when already present)
    #[serde(default)]
    pub install_attempts: u32,
}

/// One completed stage attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Position in the history
    pub sequence: u32,
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub attempt_index: u32,
    /// Fingerprint of the contract source the attempt ran against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
    /// Set on the attempt that ended the workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<PipelineError>,
}

impl StageResult {
    /// A result whose `sequence` is assigned on append.
    pub fn new(stage: Stage, status: StageStatus, started_at: DateTime<Utc>, attempt_index: u32) -> Self {
        Self {
            sequence: 0,
            stage,
            status,
            started_at,
            ended_at: Utc::now(),
            output: None,
            error: None,
            attempt_index,
            source_fingerprint: None,
            terminal_error: None,
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        Self::new(stage, StageStatus::Skipped, Utc::now(), 0)
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_error(mut self, error: ErrorRecord) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.source_fingerprint = fingerprint;
        self
    }

    pub fn with_terminal_error(mut self, error: Option<PipelineError>) -> Self {
        self.terminal_error = error;
        self
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// Marker for an attempt that started but has not produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightStage {
    pub stage: Stage,
    pub attempt_index: u32,
    pub started_at: DateTime<Utc>,
}

/// Overall outcome of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Succeeded,
    /// Every required stage passed; a non-fatal stage (verification) failed.
    SucceededWithWarnings,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededWithWarnings)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::SucceededWithWarnings => write!(f, "SUCCEEDED (with warnings)"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalState {
    pub status: WorkflowStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    /// One consolidated next step for a failed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Durable record of one end-to-end execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowContext {
    workflow_id: WorkflowId,
    pub created_at: DateTime<Utc>,
    pub request: WorkflowRequest,
    stage_history: Vec<StageResult>,
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub dependencies: Vec<DependencyDescriptor>,
    #[serde(default)]
    pub artifacts: ArtifactRefs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlightStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    terminal: Option<TerminalState>,
}

impl WorkflowContext {
    pub(crate) fn new(request: WorkflowRequest) -> Self {
        let metadata = WorkflowMetadata {
            test_only: request.test_only,
            allow_insecure: request.allow_insecure,
            ..Default::default()
        };
        Self {
            workflow_id: WorkflowId::new(),
            created_at: Utc::now(),
            request,
            stage_history: Vec::new(),
            metadata,
            dependencies: Vec::new(),
            artifacts: ArtifactRefs::default(),
            in_flight: None,
            terminal: None,
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn stage_history(&self) -> &[StageResult] {
        &self.stage_history
    }

    pub fn terminal(&self) -> Option<&TerminalState> {
        self.terminal.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// All attempts of one stage in execution order.
    pub fn results_for(&self, stage: Stage) -> impl Iterator<Item = &StageResult> {
        self.stage_history.iter().filter(move |r| r.stage == stage)
    }

    /// Most recent attempt of a stage.
    pub fn latest(&self, stage: Stage) -> Option<&StageResult> {
        self.stage_history.iter().rev().find(|r| r.stage == stage)
    }

    pub fn last_result(&self) -> Option<&StageResult> {
        self.stage_history.last()
    }

    /// Every error recorded so far, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.stage_history.iter().filter_map(|r| r.error.as_ref())
    }

    pub(crate) fn push_result(&mut self, mut result: StageResult) -> u32 {
        let sequence = self.stage_history.len() as u32;
        result.sequence = sequence;
        self.stage_history.push(result);
        sequence
    }

    pub(crate) fn set_terminal(&mut self, terminal: TerminalState) {
        self.terminal = Some(terminal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_id_roundtrip_display() {
        let id = WorkflowId::new();
        let parsed: WorkflowId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<WorkflowId>().is_err());
    }

    #[test]
    fn test_push_assigns_sequence() {
        let mut ctx = WorkflowContext::new(WorkflowRequest::new("token", "anvil"));
        let a = ctx.push_result(StageResult::skipped(Stage::Deployment));
        let b = ctx.push_result(StageResult::skipped(Stage::Verification));
        assert_eq!((a, b), (0, 1));
        assert_eq!(ctx.stage_history()[1].sequence, 1);
        assert_eq!(ctx.latest(Stage::Verification).unwrap().sequence, 1);
    }

    #[test]
    fn test_request_flags_copied_to_metadata() {
        let ctx = WorkflowContext::new(
            WorkflowRequest::new("token", "sepolia")
                .test_only(true)
                .allow_insecure(true),
        );
        assert!(ctx.metadata.test_only);
        assert!(ctx.metadata.allow_insecure);
        assert!(ctx.metadata.network.is_none());
    }
}
