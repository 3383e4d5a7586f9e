//! Cancellation and resume: a resumed workflow ends where an uninterrupted
//! one would.

mod common;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::*;
use solforge::adapters::{AuditFinding, CompiledContract, ContractVerifier, Severity};
use solforge::{OrchestratorError, WorkflowOrchestrator, WorkflowResult};
use solforge_engine::context::{DiagnosticBundle, WorkflowRequest, WorkflowStatus};
use solforge_engine::error::ContextResult;
use solforge_engine::{
    ContextError, ContextManager, ContextStore, FileContextStore, Network, PipelineError, Stage, StageStatus,
    WorkflowContext, WorkflowId,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn latest_statuses(result: &WorkflowResult) -> Vec<Option<StageStatus>> {
    Stage::ALL
        .into_iter()
        .map(|s| result.context.latest(s).map(|r| r.status))
        .collect()
}

fn token_request() -> WorkflowRequest {
    WorkflowRequest::new("create ERC20 token", "anvil")
}

/// Reference: the same external responses, never interrupted.
async fn uninterrupted_with_override_fix() -> (WorkflowResult, Vec<String>) {
    let harness = Harness::new();
    let mut fakes = Fakes::happy();
    fakes.compiler =
        Arc::new(FakeCompiler::new("Token").failing_with([override_conflict_error(TOKEN_SOURCE)]));
    let result = harness
        .orchestrator(fakes.adapters())
        .run(token_request())
        .await
        .unwrap();
    (result, fakes.compiler.seen_sources())
}

#[tokio::test]
async fn test_cancel_after_fix_then_resume_matches_uninterrupted_run() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut fakes = Fakes::happy();
    fakes.compiler = Arc::new(
        FakeCompiler::new("Token")
            .failing_with([override_conflict_error(TOKEN_SOURCE)])
            .cancelling(cancel.clone()),
    );

    let cancelled = harness
        .orchestrator(fakes.adapters())
        .with_cancellation(cancel)
        .run(token_request())
        .await
        .unwrap();

    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    assert_eq!(cancelled.exit_code(), 2);
    assert_eq!(
        cancelled.error,
        Some(PipelineError::Cancelled {
            stage: Stage::Compilation
        })
    );
    assert!(cancelled.bundle.is_none());
    assert!(!cancelled.context.is_terminal());
    let compilation: Vec<_> = cancelled
        .context
        .results_for(Stage::Compilation)
        .map(|r| (r.status, r.attempt_index))
        .collect();
    assert_eq!(
        compilation,
        vec![(StageStatus::Failed, 0), (StageStatus::Cancelled, 1)]
    );

    // fresh orchestrator, fresh token, same store and workspace
    let resumed = harness
        .orchestrator(fakes.adapters())
        .resume(cancelled.workflow_id)
        .await
        .unwrap();
    let (reference, reference_seen) = uninterrupted_with_override_fix().await;

    assert_eq!(resumed.status, reference.status);
    assert_eq!(resumed.status, WorkflowStatus::Succeeded);
    assert_eq!(latest_statuses(&resumed), latest_statuses(&reference));
    assert_eq!(
        resumed.context.latest(Stage::Compilation).unwrap().attempt_index,
        reference.context.latest(Stage::Compilation).unwrap().attempt_index,
    );
    // the resumed compile ran against the fixed source left on disk
    assert_eq!(fakes.compiler.seen_sources(), reference_seen);
    assert_eq!(resumed.bundle.unwrap().fixes.len(), 1);
}

#[tokio::test]
async fn test_interrupted_attempt_reruns_with_same_index() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut fakes = Fakes::happy();
    fakes.compiler = Arc::new(FakeCompiler::new("Token").cancelling(cancel.clone()));

    let cancelled = harness
        .orchestrator(fakes.adapters())
        .with_cancellation(cancel)
        .run(token_request())
        .await
        .unwrap();
    assert_eq!(
        cancelled.error,
        Some(PipelineError::Cancelled {
            stage: Stage::Auditing
        })
    );

    // crash in the middle of the audit: the marker is left behind
    let contexts = ContextManager::new(harness.store());
    let mut ctx = contexts.load(cancelled.workflow_id).unwrap();
    contexts.begin_stage(&mut ctx, Stage::Auditing, 0).unwrap();

    let resumed = harness
        .orchestrator(fakes.adapters())
        .resume(cancelled.workflow_id)
        .await
        .unwrap();

    assert_eq!(resumed.status, WorkflowStatus::Succeeded);
    assert!(resumed.context.in_flight.is_none());
    let audit = resumed.context.latest(Stage::Auditing).unwrap();
    assert_eq!((audit.status, audit.attempt_index), (StageStatus::Success, 0));
    // compilation is not repeated
    assert_eq!(fakes.compiler.calls(), 1);
    assert_eq!(resumed.context.results_for(Stage::Compilation).count(), 1);
}

/// Rejects the verification and stops the run right after.
struct CancellingVerifier {
    cancel: CancellationToken,
}

#[async_trait]
impl ContractVerifier for CancellingVerifier {
    async fn verify(&self, _address: &str, _artifact: &CompiledContract, _network: Network) -> Result<String> {
        self.cancel.cancel();
        Err(anyhow!("Etherscan: Invalid API Key"))
    }
}

#[tokio::test]
async fn test_resume_keeps_verification_warning() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let fakes = Fakes::happy();
    let mut adapters = fakes.adapters();
    adapters.verifier = Arc::new(CancellingVerifier {
        cancel: cancel.clone(),
    });

    let request = WorkflowRequest::new("create ERC20 token", "sepolia");
    let cancelled = harness
        .orchestrator(adapters)
        .with_cancellation(cancel)
        .run(request)
        .await
        .unwrap();
    assert_eq!(
        cancelled.error,
        Some(PipelineError::Cancelled {
            stage: Stage::Testing
        })
    );

    let resumed = harness
        .orchestrator(fakes.adapters())
        .resume(cancelled.workflow_id)
        .await
        .unwrap();

    assert_eq!(resumed.status, WorkflowStatus::SucceededWithWarnings);
    assert_eq!(
        resumed.context.latest(Stage::Testing).map(|r| r.status),
        Some(StageStatus::Success)
    );
    assert_eq!(resumed.context.results_for(Stage::Deployment).count(), 1);
    assert_eq!(
        resumed.context.artifacts.deployment.as_ref().map(|d| d.network),
        Some(Network::Sepolia)
    );
}

#[tokio::test]
async fn test_finished_workflow_cannot_resume() {
    let harness = Harness::new();
    let fakes = Fakes::happy();
    let orchestrator = harness.orchestrator(fakes.adapters());
    let done = orchestrator
        .run(token_request().test_only(true))
        .await
        .unwrap();

    let err = orchestrator.resume(done.workflow_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyFinished(id) if id == done.workflow_id));
}

#[tokio::test]
async fn test_resume_unknown_workflow_is_not_found() {
    let harness = Harness::new();
    let fakes = Fakes::happy();
    let err = harness
        .orchestrator(fakes.adapters())
        .resume(solforge_engine::WorkflowId::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Context(solforge_engine::ContextError::NotFound { .. })
    ));
}

/// Loses power right before the diagnostic bundle hits the disk.
struct CrashBeforeBundle {
    inner: FileContextStore,
}

impl ContextStore for CrashBeforeBundle {
    fn save_context(&self, ctx: &WorkflowContext) -> ContextResult<()> {
        self.inner.save_context(ctx)
    }

    fn load_context(&self, id: WorkflowId) -> ContextResult<Option<WorkflowContext>> {
        self.inner.load_context(id)
    }

    fn save_diagnostic_bundle(&self, _bundle: &DiagnosticBundle) -> ContextResult<()> {
        Err(ContextError::Io(std::io::Error::other("power lost")))
    }

    fn load_diagnostic_bundle(&self, id: WorkflowId) -> ContextResult<Option<DiagnosticBundle>> {
        self.inner.load_diagnostic_bundle(id)
    }
}

#[tokio::test]
async fn test_crash_before_finalize_keeps_terminal_error() {
    let harness = Harness::new();
    let mut fakes = Fakes::happy();
    fakes.auditor = Arc::new(FakeAuditor::reporting(vec![AuditFinding::new(
        Severity::High,
        "arbitrary-send-eth: Token.sweep() sends eth to arbitrary user",
    )]));
    fakes.deployer = never_deploys();

    let crashing = Arc::new(CrashBeforeBundle {
        inner: FileContextStore::new(&harness.config.state_dir),
    });
    let err = WorkflowOrchestrator::new(harness.config.clone(), fakes.adapters(), crashing)
        .run(token_request())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Context(ContextError::Io(_))));

    let id = harness.store().list().unwrap()[0];
    let persisted = ContextManager::new(harness.store()).load(id).unwrap();
    assert!(!persisted.is_terminal());
    assert_eq!(
        persisted.latest(Stage::Auditing).unwrap().terminal_error,
        Some(PipelineError::AuditBlocked { count: 1 })
    );

    let resumed = harness.orchestrator(fakes.adapters()).resume(id).await.unwrap();
    let expected = PipelineError::AuditBlocked { count: 1 };
    assert_eq!(resumed.status, WorkflowStatus::Failed);
    assert_eq!(resumed.suggestion, Some(expected.suggestion()));
    assert_eq!(resumed.error, Some(expected));
    assert_eq!(resumed.context.results_for(Stage::Auditing).count(), 1);
    assert!(resumed.bundle.is_some());
}

#[tokio::test]
async fn test_cancel_between_testing_calls_stops_before_tests_run() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    let mut fakes = Fakes::happy();
    // the smoke test pulls in forge-std during Testing
    fakes.package_manager = Arc::new(FakePackageManager::cancelling_on("forge-std", cancel.clone()));

    let cancelled = harness
        .orchestrator(fakes.adapters())
        .with_cancellation(cancel)
        .run(token_request())
        .await
        .unwrap();

    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    assert_eq!(
        cancelled.error,
        Some(PipelineError::Cancelled {
            stage: Stage::Testing
        })
    );
    let testing = cancelled.context.latest(Stage::Testing).unwrap();
    assert_eq!((testing.status, testing.attempt_index), (StageStatus::Cancelled, 0));
    assert!(cancelled.context.artifacts.test_report.is_none());
    assert!(cancelled.context.in_flight.is_none());

    let resumed = harness
        .orchestrator(fakes.adapters())
        .resume(cancelled.workflow_id)
        .await
        .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Succeeded);
    let testing: Vec<_> = resumed
        .context
        .results_for(Stage::Testing)
        .map(|r| (r.status, r.attempt_index))
        .collect();
    assert_eq!(
        testing,
        vec![(StageStatus::Cancelled, 0), (StageStatus::Success, 0)]
    );
    assert!(resumed.context.artifacts.test_report.is_some());
    assert_eq!(fakes.package_manager.installs_of("forge-std"), 1);
}
