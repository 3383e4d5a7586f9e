//! Terminal diagnostic bundle
//!
//! Built once from a finalized context. Stores refuse to overwrite a bundle.

use crate::context::types::{
    ArtifactRefs, DependencyDescriptor, InsecureOverride, WorkflowContext, WorkflowId, WorkflowStatus,
};
use crate::healing::record::ErrorRecord;
use crate::stage::{Stage, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub engine_version: String,
    pub os: String,
    pub arch: String,
}

impl RuntimeInfo {
    pub fn current() -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub sequence: u32,
    pub stage: Stage,
    pub status: StageStatus,
    pub attempt_index: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// An applied fix, flattened for post-mortem reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFix {
    pub stage: Stage,
    pub attempt_index: u32,
    pub rule: String,
    pub description: String,
    /// Unified diff of the source change, when the fix edited source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticBundle {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
    pub runtime: RuntimeInfo,
    pub tool_versions: BTreeMap<String, String>,
    pub stage_timings: Vec<StageTiming>,
    pub errors: Vec<ErrorRecord>,
    pub fixes: Vec<AppliedFix>,
    pub dependencies: Vec<DependencyDescriptor>,
    pub metadata_repairs: Vec<String>,
    pub insecure_overrides: Vec<InsecureOverride>,
    pub artifacts: ArtifactRefs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl DiagnosticBundle {
    /// Snapshot a finalized context. Returns `None` while it is still running.
    pub fn from_context(ctx: &WorkflowContext) -> Option<Self> {
        let terminal = ctx.terminal()?;

        let stage_timings = ctx
            .stage_history()
            .iter()
            .map(|r| StageTiming {
                sequence: r.sequence,
                stage: r.stage,
                status: r.status,
                attempt_index: r.attempt_index,
                started_at: r.started_at,
                ended_at: r.ended_at,
                duration_ms: r.duration_ms(),
            })
            .collect();

        let fixes = ctx
            .stage_history()
            .iter()
            .filter_map(|r| {
                let error = r.error.as_ref()?;
                if !error.auto_fix_applied {
                    return None;
                }
                Some(AppliedFix {
                    stage: r.stage,
                    attempt_index: r.attempt_index,
                    rule: error
                        .fix
                        .as_ref()
                        .map(|f| f.rule.clone())
                        .unwrap_or_else(|| error.kind.to_string()),
                    description: error.fix_description.clone().unwrap_or_default(),
                    diff: error.fix.as_ref().map(|f| f.unified_diff("contract.sol")),
                })
            })
            .collect();

        Some(Self {
            workflow_id: ctx.workflow_id(),
            status: terminal.status,
            created_at: ctx.created_at,
            finalized_at: terminal.at,
            runtime: RuntimeInfo::current(),
            tool_versions: ctx.metadata.tool_versions.clone(),
            stage_timings,
            errors: ctx.errors().cloned().collect(),
            fixes,
            dependencies: ctx.dependencies.clone(),
            metadata_repairs: ctx.metadata.metadata_repairs.clone(),
            insecure_overrides: ctx.metadata.insecure_overrides.clone(),
            artifacts: ctx.artifacts.clone(),
            failed_stage: terminal.failed_stage,
            suggestion: terminal.suggestion.clone(),
        })
    }
}
