//! Durable workflow context and diagnostics

pub mod diagnostics;
pub mod manager;
pub mod store;
pub mod types;

pub use diagnostics::{AppliedFix, DiagnosticBundle, RuntimeInfo, StageTiming};
pub use manager::ContextManager;
pub use store::{ContextStore, FileContextStore};
pub use types::{
    ArtifactRefs, DependencyDescriptor, DeploymentRef, InFlightStage, InsecureOverride, StageResult,
    TerminalState, TestSummary, WorkflowContext, WorkflowId, WorkflowMetadata, WorkflowRequest,
    WorkflowStatus,
};
