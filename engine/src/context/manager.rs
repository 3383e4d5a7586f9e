//! Context lifecycle: create, record attempts, persist, finalize.
//!
//! Every mutation goes through the manager and is persisted before the call
//! returns, so a crash never loses a completed stage transition.

use crate::context::diagnostics::DiagnosticBundle;
use crate::context::store::ContextStore;
use crate::context::types::{
    InFlightStage, StageResult, TerminalState, WorkflowContext, WorkflowId, WorkflowRequest,
    WorkflowStatus,
};
use crate::error::{ContextError, ContextResult};
use crate::stage::Stage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ContextManager {
    store: Arc<dyn ContextStore>,
}

impl ContextManager {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// New context with a fresh id, persisted immediately.
    pub fn create(&self, request: WorkflowRequest) -> ContextResult<WorkflowContext> {
        let ctx = WorkflowContext::new(request);
        self.store.save_context(&ctx)?;
        info!(workflow_id = %ctx.workflow_id(), "Workflow context created");
        Ok(ctx)
    }

    /// Mark an attempt as started. The marker survives a crash and tells a
    /// resumed run which attempt was interrupted.
    pub fn begin_stage(
        &self,
        ctx: &mut WorkflowContext,
        stage: Stage,
        attempt_index: u32,
    ) -> ContextResult<()> {
        ensure_open(ctx)?;
        ctx.in_flight = Some(InFlightStage {
            stage,
            attempt_index,
            started_at: Utc::now(),
        });
        self.persist(ctx)
    }

    /// Append a completed attempt and persist. Clears the in-flight marker.
    pub fn append(&self, ctx: &mut WorkflowContext, result: StageResult) -> ContextResult<u32> {
        ensure_open(ctx)?;
        if ctx
            .in_flight
            .as_ref()
            .is_some_and(|f| f.stage == result.stage)
        {
            ctx.in_flight = None;
        }
        let stage = result.stage;
        let status = result.status;
        let attempt = result.attempt_index;
        let sequence = ctx.push_result(result);
        self.persist(ctx)?;
        debug!(
            workflow_id = %ctx.workflow_id(),
            %stage,
            %status,
            attempt,
            sequence,
            "Stage result recorded"
        );
        Ok(sequence)
    }

    pub fn clear_in_flight(&self, ctx: &mut WorkflowContext) -> ContextResult<()> {
        ensure_open(ctx)?;
        if ctx.in_flight.take().is_some() {
            self.persist(ctx)?;
        }
        Ok(())
    }

    pub fn persist(&self, ctx: &WorkflowContext) -> ContextResult<()> {
        self.store.save_context(ctx)
    }

    /// Close the context and write its diagnostic bundle. Called once.
    pub fn finalize(
        &self,
        ctx: &mut WorkflowContext,
        status: WorkflowStatus,
        failed_stage: Option<Stage>,
        suggestion: Option<String>,
    ) -> ContextResult<DiagnosticBundle> {
        ensure_open(ctx)?;
        ctx.in_flight = None;
        ctx.set_terminal(TerminalState {
            status,
            at: Utc::now(),
            failed_stage,
            suggestion,
        });
        let bundle = DiagnosticBundle::from_context(ctx).ok_or(ContextError::Finalized {
            id: ctx.workflow_id(),
        })?;
        self.store.save_diagnostic_bundle(&bundle)?;
        self.persist(ctx)?;
        info!(
            workflow_id = %ctx.workflow_id(),
            %status,
            stages = ctx.stage_history().len(),
            "Workflow finalized"
        );
        Ok(bundle)
    }

    pub fn load(&self, id: WorkflowId) -> ContextResult<WorkflowContext> {
        self.store
            .load_context(id)?
            .ok_or(ContextError::NotFound { id })
    }

    pub fn load_bundle(&self, id: WorkflowId) -> ContextResult<Option<DiagnosticBundle>> {
        self.store.load_diagnostic_bundle(id)
    }
}

fn ensure_open(ctx: &WorkflowContext) -> ContextResult<()> {
    if ctx.is_terminal() {
        return Err(ContextError::Finalized {
            id: ctx.workflow_id(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::store::FileContextStore;
    use crate::healing::record::{ErrorKind, ErrorRecord};
    use crate::stage::StageStatus;

    fn manager(dir: &tempfile::TempDir) -> ContextManager {
        ContextManager::new(Arc::new(FileContextStore::new(dir.path())))
    }

    #[test]
    fn test_every_transition_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut ctx = mgr.create(WorkflowRequest::new("create ERC20 token", "anvil")).unwrap();
        let id = ctx.workflow_id();

        mgr.begin_stage(&mut ctx, Stage::Preflight, 0).unwrap();
        let reloaded = mgr.load(id).unwrap();
        assert_eq!(reloaded.in_flight.as_ref().unwrap().stage, Stage::Preflight);

        let started = Utc::now();
        mgr.append(&mut ctx, StageResult::new(Stage::Preflight, StageStatus::Success, started, 0))
            .unwrap();
        let reloaded = mgr.load(id).unwrap();
        assert!(reloaded.in_flight.is_none());
        assert_eq!(reloaded.stage_history().len(), 1);
    }

    #[test]
    fn test_retries_append_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut ctx = mgr.create(WorkflowRequest::new("token", "anvil")).unwrap();
        let now = Utc::now();
        mgr.append(
            &mut ctx,
            StageResult::new(Stage::Compilation, StageStatus::Failed, now, 0)
                .with_error(ErrorRecord::new(Stage::Compilation, "x", ErrorKind::OverrideConflict)),
        )
        .unwrap();
        mgr.append(&mut ctx, StageResult::new(Stage::Compilation, StageStatus::Success, now, 1))
            .unwrap();

        let statuses: Vec<_> = ctx.results_for(Stage::Compilation).map(|r| r.status).collect();
        assert_eq!(statuses, vec![StageStatus::Failed, StageStatus::Success]);
        let seqs: Vec<_> = ctx.stage_history().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_finalize_once_and_freeze() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut ctx = mgr.create(WorkflowRequest::new("token", "anvil")).unwrap();
        let bundle = mgr
            .finalize(&mut ctx, WorkflowStatus::Failed, Some(Stage::Compilation), Some("fix it".into()))
            .unwrap();
        assert_eq!(bundle.status, WorkflowStatus::Failed);
        assert_eq!(bundle.failed_stage, Some(Stage::Compilation));

        assert!(matches!(
            mgr.append(&mut ctx, StageResult::skipped(Stage::Output)),
            Err(ContextError::Finalized { .. })
        ));
        assert!(mgr.finalize(&mut ctx, WorkflowStatus::Succeeded, None, None).is_err());

        let stored = mgr.load_bundle(ctx.workflow_id()).unwrap().unwrap();
        assert_eq!(stored, bundle);
        assert!(mgr.load(ctx.workflow_id()).unwrap().is_terminal());
    }

    #[test]
    fn test_load_unknown_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        assert!(matches!(
            mgr.load(WorkflowId::new()),
            Err(ContextError::NotFound { .. })
        ));
    }
}
