//! Workflow orchestration
//!
//! Drives one workflow through the canonical stage order. Every stage attempt
//! is bracketed by an in-flight marker and a persisted [`StageResult`]. A
//! failed attempt goes through classification, an optional scoped fix and a
//! retry decision before anything else runs:
//!
//! ```text
//! attempt ──ok──────────────────────────────────────────► next stage
//!    │
//!    └─fail─► classify ─► apply fix / re-resolve ─► RetryCoordinator
//!                                                     ├─ Retry    → attempt again
//!                                                     └─ Terminal → finalize (Failed)
//! ```
//!
//! Cancellation is checked before each attempt, never mid-call. A cancelled
//! workflow is persisted but not finalized, so it can be resumed.

use crate::adapters::{Adapters, AuditFinding, CompiledContract, DeploymentReceipt};
use crate::config::PipelineConfig;
use crate::input::{self, ParsedInput};
use crate::workspace::Workspace;
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use solforge_engine::context::{
    DependencyDescriptor, DeploymentRef, DiagnosticBundle, InsecureOverride, StageResult,
    TestSummary, WorkflowRequest, WorkflowStatus,
};
use solforge_engine::deps::{catalog, DependencyError, DependencyResolver};
use solforge_engine::healing::rules::LibraryVersions;
use solforge_engine::healing::source;
use solforge_engine::retry::{AttemptState, TransitionError};
use solforge_engine::{
    ContextError, ContextManager, ContextStore, ErrorKind, ErrorRecord, Network, PipelineError,
    RetryCoordinator, RetryDecision, SelfHealingErrorHandler, Stage, StageStatus, WorkflowContext,
    WorkflowId,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static CONTRACT_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*contract\s+([A-Za-z_$][\w$]*)").unwrap());

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Infrastructure failures: the workflow could not be driven at all.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Workspace error: {0:#}")]
    Workspace(anyhow::Error),

    #[error("Workflow {0} has already finished")]
    AlreadyFinished(WorkflowId),
}

/// What `run`/`resume` hand back.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub error: Option<PipelineError>,
    pub suggestion: Option<String>,
    pub context: WorkflowContext,
    /// `None` for a cancelled (still resumable) workflow
    pub bundle: Option<DiagnosticBundle>,
}

impl WorkflowResult {
    /// 0 success, 1 terminal failure, 2 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            WorkflowStatus::Succeeded | WorkflowStatus::SucceededWithWarnings => 0,
            WorkflowStatus::Failed => 1,
            WorkflowStatus::Cancelled => 2,
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.error
            .as_ref()
            .filter(|e| !e.is_cancelled())
            .map(PipelineError::stage)
    }
}

/// Contents of `result.json`.
#[derive(Debug, Serialize)]
struct WorkflowOutput<'a> {
    workflow_id: WorkflowId,
    status: WorkflowStatus,
    contract_name: Option<&'a str>,
    network: Option<Network>,
    artifacts: &'a solforge_engine::context::ArtifactRefs,
    dependencies: &'a [DependencyDescriptor],
}

/// A failed attempt before classification.
struct Failure {
    raw: String,
    /// Skip classification and record a fatal error of this kind
    fatal: Option<ErrorKind>,
    /// Surface this instead of the stage's default error
    error: Option<PipelineError>,
}

impl Failure {
    fn classified(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            fatal: None,
            error: None,
        }
    }

    fn fatal(kind: ErrorKind, raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            fatal: Some(kind),
            error: None,
        }
    }

    fn with_error(mut self, error: PipelineError) -> Self {
        self.error = Some(error);
        self
    }

    fn infra(e: anyhow::Error) -> Self {
        Self::fatal(ErrorKind::Unknown, format!("{e:#}"))
    }

    fn missing(what: &str, stage: Stage) -> Self {
        Self::fatal(ErrorKind::Unknown, format!("{what} unavailable at {stage}"))
    }

    /// Stopped between two adapter calls of one attempt
    fn cancelled(stage: Stage) -> Self {
        Self::classified("cancellation requested").with_error(PipelineError::Cancelled { stage })
    }

    fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(PipelineError::is_cancelled)
    }
}

enum StageEnd {
    Passed,
    /// Non-fatal failure; the workflow continues
    Warned,
    Failed {
        error: PipelineError,
        guidance: Option<String>,
    },
    Cancelled(Stage),
}

/// Everything one run carries between stages.
struct RunState {
    ctx: WorkflowContext,
    coordinator: RetryCoordinator,
    handler: SelfHealingErrorHandler,
    workspace: Option<Workspace>,
    network: Option<Network>,
    input: Option<ParsedInput>,
    source: Option<String>,
    compiled: Option<CompiledContract>,
    receipt: Option<DeploymentReceipt>,
    warnings: bool,
}

impl RunState {
    fn new(ctx: WorkflowContext, coordinator: RetryCoordinator) -> Self {
        Self {
            ctx,
            coordinator,
            handler: SelfHealingErrorHandler::new(),
            workspace: None,
            network: None,
            input: None,
            source: None,
            compiled: None,
            receipt: None,
            warnings: false,
        }
    }

    fn contract_name(&self) -> Option<&str> {
        self.input.as_ref().map(|i| i.contract_name.as_str())
    }
}

pub struct WorkflowOrchestrator {
    config: PipelineConfig,
    adapters: Adapters,
    contexts: ContextManager,
    resolver: DependencyResolver,
    cancel: CancellationToken,
}

impl WorkflowOrchestrator {
    pub fn new(config: PipelineConfig, adapters: Adapters, store: Arc<dyn ContextStore>) -> Self {
        let resolver = DependencyResolver::new(adapters.package_manager.clone(), config.resolver_config());
        Self {
            config,
            adapters,
            contexts: ContextManager::new(store),
            resolver,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    /// Run a new workflow from Preflight to Output.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowResult, OrchestratorError> {
        let ctx = self.contexts.create(request)?;
        info!(
            workflow_id = %ctx.workflow_id(),
            network = %ctx.request.network,
            test_only = ctx.request.test_only,
            "Workflow started"
        );
        let coordinator = RetryCoordinator::new(self.config.retry);
        self.drive(RunState::new(ctx, coordinator), Stage::Preflight)
            .await
    }

    /// Continue a persisted, unfinished workflow.
    ///
    /// Retry state is rebuilt from the stage history, so the resumed run
    /// makes the same decisions the original would have. An attempt that was
    /// interrupted mid-flight is re-run with the same attempt index.
    pub async fn resume(&self, id: WorkflowId) -> Result<WorkflowResult, OrchestratorError> {
        let mut ctx = self.contexts.load(id)?;
        if ctx.is_terminal() {
            return Err(OrchestratorError::AlreadyFinished(id));
        }
        if let Some(flight) = ctx.in_flight.clone() {
            warn!(
                workflow_id = %id,
                stage = %flight.stage,
                attempt = flight.attempt_index,
                "Re-running interrupted attempt"
            );
            self.contexts.clear_in_flight(&mut ctx)?;
        }

        let coordinator = RetryCoordinator::from_history(self.config.retry, ctx.stage_history())?;
        let mut state = RunState::new(ctx, coordinator);
        self.restore(&mut state)?;

        for stage in Stage::ALL {
            let latest = state.ctx.latest(stage).map(|r| r.status);
            match latest {
                Some(status) if status.is_passing() => continue,
                Some(StageStatus::Failed) if state.coordinator.state(stage) == AttemptState::Terminal => {
                    if stage == Stage::Verification {
                        state.warnings = true;
                        continue;
                    }
                    // died between the terminal decision and finalize
                    let Some(latest) = state.ctx.latest(stage).cloned() else {
                        continue;
                    };
                    let record = latest.error;
                    let error = latest.terminal_error.unwrap_or_else(|| {
                        let headline = record.as_ref().map(|r| r.headline().to_string()).unwrap_or_default();
                        PipelineError::for_stage(stage, headline)
                    });
                    let end = StageEnd::Failed {
                        error,
                        guidance: record.and_then(|r| r.guidance),
                    };
                    return self.finish(state, end);
                }
                _ => {
                    info!(workflow_id = %id, %stage, "Resuming workflow");
                    return self.drive(state, stage).await;
                }
            }
        }
        self.finish(state, StageEnd::Passed)
    }

    /// Rebuild in-memory run state from the context and the workspace.
    fn restore(&self, state: &mut RunState) -> Result<(), OrchestratorError> {
        let passed = |stage: Stage| {
            state
                .ctx
                .latest(stage)
                .is_some_and(|r| r.status.is_passing())
        };
        let preflight_done = passed(Stage::Preflight);
        let input_done = passed(Stage::InputParsing);

        state.network = state.ctx.metadata.network;
        if preflight_done {
            let ws = Workspace::open(&self.config.work_root, state.ctx.workflow_id())
                .map_err(OrchestratorError::Workspace)?;
            state.workspace = Some(ws);
        }
        if input_done {
            if let Ok(mut parsed) = input::parse_request(&state.ctx.request.prompt) {
                if let Some(name) = &state.ctx.metadata.contract_name {
                    parsed.contract_name = name.clone();
                }
                state.input = Some(parsed);
            }
        }
        if let (Some(ws), Some(name)) = (&state.workspace, state.contract_name()) {
            state.source = ws.read_source(name).map_err(OrchestratorError::Workspace)?;
            state.compiled = ws.read_compiled().map_err(OrchestratorError::Workspace)?;
        }
        state.receipt = state.ctx.artifacts.deployment.as_ref().map(|d| DeploymentReceipt {
            address: d.address.clone(),
            tx_hash: d.tx_hash.clone(),
        });
        state.handler = handler_for(&state.ctx.dependencies);
        state.warnings = state
            .ctx
            .latest(Stage::Verification)
            .is_some_and(|r| r.status == StageStatus::Failed);
        Ok(())
    }

    async fn drive(&self, mut state: RunState, start: Stage) -> Result<WorkflowResult, OrchestratorError> {
        for stage in Stage::ALL.into_iter().filter(|s| *s >= start) {
            if let Some(reason) = self.skip_reason(&state, stage) {
                info!(workflow_id = %state.ctx.workflow_id(), %stage, %reason, "Stage skipped");
                self.contexts
                    .append(&mut state.ctx, StageResult::skipped(stage).with_output(reason))?;
                continue;
            }
            match self.run_stage(&mut state, stage).await? {
                StageEnd::Passed => {}
                StageEnd::Warned => state.warnings = true,
                end @ (StageEnd::Failed { .. } | StageEnd::Cancelled(_)) => return self.finish(state, end),
            }
        }
        self.finish(state, StageEnd::Passed)
    }

    fn skip_reason(&self, state: &RunState, stage: Stage) -> Option<String> {
        if state.ctx.request.test_only && stage.is_live_network_stage() {
            return Some("test-only mode".to_string());
        }
        if stage == Stage::Verification {
            if let Some(network) = state.network.filter(|n| !n.supports_verification()) {
                return Some(format!("no explorer verification on {network}"));
            }
        }
        None
    }

    /// Attempt a stage until it passes or the coordinator gives up.
    async fn run_stage(&self, state: &mut RunState, stage: Stage) -> Result<StageEnd, OrchestratorError> {
        let id = state.ctx.workflow_id();
        loop {
            if self.cancel.is_cancelled() {
                return self.cancel_stage(state, stage);
            }

            let attempt = state.coordinator.begin(stage)?;
            self.contexts.begin_stage(&mut state.ctx, stage, attempt)?;
            let started_at = Utc::now();
            let fingerprint = state.source.as_deref().map(source::fingerprint);
            debug!(workflow_id = %id, %stage, attempt, "Stage attempt started");

            let failure = match self.attempt(state, stage).await {
                Ok(output) => {
                    state.coordinator.record_success(stage)?;
                    let result = StageResult::new(stage, StageStatus::Success, started_at, attempt)
                        .with_output(output)
                        .with_fingerprint(fingerprint);
                    self.contexts.append(&mut state.ctx, result)?;
                    info!(workflow_id = %id, %stage, attempt, "Stage succeeded");
                    return Ok(StageEnd::Passed);
                }
                Err(failure) if failure.is_cancelled() => return self.cancel_stage(state, stage),
                Err(failure) => failure,
            };

            let error_override = failure.error.clone();
            let record = self.remediate(state, stage, failure).await?;
            let decision = state.coordinator.on_failure(stage, &record)?;
            warn!(
                workflow_id = %id,
                %stage,
                attempt,
                kind = %record.kind,
                fixed = record.auto_fix_applied,
                "Stage failed: {}",
                record.headline()
            );
            let (delay, terminal) = match decision {
                RetryDecision::Retry { delay, .. } => (delay, None),
                RetryDecision::Terminal { reason } => {
                    let error = error_override
                        .unwrap_or_else(|| PipelineError::for_stage(stage, record.headline()));
                    (Duration::ZERO, Some((reason, error)))
                }
            };
            let result = StageResult::new(stage, StageStatus::Failed, started_at, attempt)
                .with_output(record.headline().to_string())
                .with_error(record.clone())
                .with_fingerprint(fingerprint)
                .with_terminal_error(terminal.as_ref().map(|(_, error)| error.clone()));
            self.contexts.append(&mut state.ctx, result)?;

            let Some((reason, error)) = terminal else {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                }
                continue;
            };
            if !error.is_fatal() {
                state.ctx.artifacts.verification_status = Some(format!("failed: {}", record.headline()));
                self.contexts.persist(&state.ctx)?;
                warn!(workflow_id = %id, %stage, %reason, "Non-fatal stage failure; continuing");
                return Ok(StageEnd::Warned);
            }
            return Ok(StageEnd::Failed {
                error,
                guidance: record.guidance,
            });
        }
    }

    fn cancel_stage(&self, state: &mut RunState, stage: Stage) -> Result<StageEnd, OrchestratorError> {
        state.coordinator.cancel(stage)?;
        let attempt = state.coordinator.attempt_index(stage);
        let result = StageResult::new(stage, StageStatus::Cancelled, Utc::now(), attempt)
            .with_output("cancellation requested");
        self.contexts.append(&mut state.ctx, result)?;
        warn!(workflow_id = %state.ctx.workflow_id(), %stage, "Workflow cancelled");
        Ok(StageEnd::Cancelled(stage))
    }

    /// Classify a failure and try to fix what it names.
    async fn remediate(
        &self,
        state: &mut RunState,
        stage: Stage,
        failure: Failure,
    ) -> Result<ErrorRecord, OrchestratorError> {
        if let Some(kind) = failure.fatal {
            return Ok(ErrorRecord::fatal(stage, failure.raw, kind));
        }

        let current = state.source.clone().unwrap_or_default();
        let mut record = state.handler.classify(&failure.raw, stage, &current);

        if record.kind == ErrorKind::DependencyMissing && !record.fatal {
            // environment fix: the source is fine, the cache is not
            let Some(root) = state.workspace.as_ref().map(|w| w.root().to_path_buf()) else {
                return Ok(record);
            };
            match self.timed(stage, self.resolver.resolve(&current, &root)).await {
                Ok(Ok(deps)) => {
                    let names: Vec<_> = deps.iter().map(|d| d.name.clone()).collect();
                    merge_dependencies(&mut state.ctx.dependencies, deps);
                    state.handler = handler_for(&state.ctx.dependencies);
                    record.mark_remediated(format!("re-resolved dependencies: {}", names.join(", ")));
                }
                Ok(Err(e)) => warn!(%stage, error = %e, "Dependency re-resolution failed"),
                Err(f) => warn!(%stage, error = %f.raw, "Dependency re-resolution timed out"),
            }
            return Ok(record);
        }

        let (fixed, applied) = state.handler.apply_fix(&mut record, &current);
        if applied {
            if let (Some(ws), Some(name)) = (&state.workspace, state.contract_name()) {
                ws.write_source(name, &fixed).map_err(OrchestratorError::Workspace)?;
            }
            state.source = Some(fixed);
        }
        Ok(record)
    }

    async fn attempt(&self, state: &mut RunState, stage: Stage) -> Result<String, Failure> {
        match stage {
            Stage::Preflight => self.preflight(state).await,
            Stage::InputParsing => self.parse_input(state),
            Stage::Generation => self.generate(state).await,
            Stage::DependencyResolution => self.resolve_dependencies(state).await,
            Stage::Compilation => self.compile(state).await,
            Stage::Auditing => self.audit(state).await,
            Stage::Deployment => self.deploy(state).await,
            Stage::Verification => self.verify(state).await,
            Stage::Testing => self.test(state).await,
            Stage::Output => self.output(state),
        }
    }

    /// Bound an adapter call by the stage timeout. A timeout is a transient
    /// failure.
    /// Cancellation check for attempts that make more than one adapter call.
    fn checkpoint(&self, stage: Stage) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::cancelled(stage));
        }
        Ok(())
    }

    async fn timed<F: Future>(&self, stage: Stage, fut: F) -> Result<F::Output, Failure> {
        let limit = self.config.timeouts.for_stage(stage);
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            Failure::classified(format!("{stage} adapter call timed out after {}s", limit.as_secs()))
        })
    }

    async fn call<T, F>(&self, stage: Stage, fut: F) -> Result<T, Failure>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        self.timed(stage, fut)
            .await?
            .map_err(|e| Failure::classified(format!("{e:#}")))
    }

    async fn preflight(&self, state: &mut RunState) -> Result<String, Failure> {
        let network: Network = state.ctx.request.network.parse().map_err(|e: solforge_engine::UnsupportedNetwork| {
            Failure::classified(e.to_string()).with_error(PipelineError::UnsupportedNetwork(e))
        })?;
        state.network = Some(network);
        state.ctx.metadata.network = Some(network);

        let ws = Workspace::open(&self.config.work_root, state.ctx.workflow_id()).map_err(Failure::infra)?;
        state.workspace = Some(ws);

        self.query_versions(state).await;

        let repairs = self
            .timed(Stage::Preflight, self.resolver.check_preconditions())
            .await?
            .map_err(|e| Failure::classified(e.to_string()))?;
        let count = repairs.len();
        state.ctx.metadata.metadata_repairs.extend(repairs);

        Ok(format!(
            "network {network} (chain {}), {count} metadata repair(s)",
            network.chain_id()
        ))
    }

    async fn query_versions(&self, state: &mut RunState) {
        let queries = [
            ("generator", timeout_opt(self.adapters.generator.version()).await),
            ("package_manager", timeout_opt(self.adapters.package_manager.version()).await),
            ("compiler", timeout_opt(self.adapters.compiler.version()).await),
            ("auditor", timeout_opt(self.adapters.auditor.version()).await),
        ];
        for (tool, version) in queries {
            if let Some(version) = version {
                state.ctx.metadata.tool_versions.insert(tool.to_string(), version);
            }
        }
    }

    fn parse_input(&self, state: &mut RunState) -> Result<String, Failure> {
        let parsed = input::parse_request(&state.ctx.request.prompt)
            .map_err(|e| Failure::fatal(ErrorKind::Unknown, e.to_string()))?;
        state.ctx.metadata.contract_name = Some(parsed.contract_name.clone());
        let output = format!("contract {}", parsed.contract_name);
        state.input = Some(parsed);
        Ok(output)
    }

    async fn generate(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::Generation;
        let (prompt, docs, preferred) = match &state.input {
            Some(i) => (i.prompt.clone(), i.context_docs.clone(), i.contract_name.clone()),
            None => return Err(Failure::missing("parsed input", stage)),
        };
        let ws = state.workspace.clone().ok_or_else(|| Failure::missing("workspace", stage))?;

        let source = self
            .call(stage, self.adapters.generator.generate(&prompt, &docs))
            .await?;
        let name = declared_contract(&source, &preferred).ok_or_else(|| {
            Failure::fatal(ErrorKind::Unknown, "generated source declares no contract")
        })?;
        if name != preferred {
            debug!(expected = %preferred, found = %name, "Using contract name from generated source");
        }

        let path = ws.write_source(&name, &source).map_err(Failure::infra)?;
        state.ctx.artifacts.source_path = Some(path);
        state.ctx.metadata.contract_name = Some(name.clone());
        if let Some(input) = state.input.as_mut() {
            input.contract_name = name.clone();
        }
        let lines = source.lines().count();
        state.source = Some(source);
        Ok(format!("{lines} lines, contract {name}"))
    }

    async fn resolve_dependencies(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::DependencyResolution;
        let source = state.source.clone().ok_or_else(|| Failure::missing("source", stage))?;
        let root = project_root(state, stage)?;

        let deps = match self.timed(stage, self.resolver.resolve(&source, &root)).await? {
            Ok(deps) => deps,
            Err(e @ DependencyError::InstallExhausted { .. }) => {
                let message = e.to_string();
                return Err(Failure::fatal(ErrorKind::DependencyMissing, message.clone())
                    .with_error(PipelineError::DependencyResolution { message }));
            }
            Err(e) => return Err(Failure::classified(e.to_string())),
        };

        let installed_now = deps.iter().filter(|d| d.install_attempts > 0).count();
        let total = deps.len();
        merge_dependencies(&mut state.ctx.dependencies, deps);
        state.handler = handler_for(&state.ctx.dependencies);
        Ok(if total == 0 {
            "no external libraries".to_string()
        } else {
            format!("{total} librar(ies), {installed_now} installed now")
        })
    }

    async fn compile(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::Compilation;
        let root = project_root(state, stage)?;
        let name = state
            .contract_name()
            .map(str::to_string)
            .ok_or_else(|| Failure::missing("contract name", stage))?;

        let output = self.call(stage, self.adapters.compiler.compile(&root)).await?;
        let compiled = output
            .find(&name)
            .filter(|c| c.has_bytecode())
            .cloned()
            .ok_or_else(|| Failure::fatal(ErrorKind::Unknown, format!("no deployable bytecode for {name}")))?;

        if let Some(ws) = &state.workspace {
            ws.write_compiled(&compiled).map_err(Failure::infra)?;
        }
        state.ctx.artifacts.artifact_path = Some(compiled.artifact_path.clone());
        let bytes = compiled.bytecode.trim_start_matches("0x").len() / 2;
        state.compiled = Some(compiled);
        Ok(format!("{name}: {bytes} bytes, {} warning(s)", output.warnings.len()))
    }

    async fn audit(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::Auditing;
        let root = project_root(state, stage)?;
        let source = state.source.clone().ok_or_else(|| Failure::missing("source", stage))?;

        let findings = self.call(stage, self.adapters.auditor.audit(&root, &source)).await?;
        let blocking: Vec<&AuditFinding> = findings.iter().filter(|f| f.severity.is_blocking()).collect();
        let summary = format!("{} finding(s), {} high", findings.len(), blocking.len());
        state.ctx.artifacts.audit_summary = Some(summary.clone());

        if blocking.is_empty() {
            return Ok(summary);
        }
        let summaries: Vec<String> = blocking.iter().map(|f| f.summary.clone()).collect();
        if !state.ctx.request.allow_insecure {
            return Err(Failure::fatal(
                ErrorKind::Unknown,
                format!("{} high-severity finding(s): {}", summaries.len(), summaries.join("; ")),
            )
            .with_error(PipelineError::AuditBlocked {
                count: summaries.len(),
            }));
        }

        warn!(
            workflow_id = %state.ctx.workflow_id(),
            findings = summaries.len(),
            "Proceeding past high-severity findings (allow_insecure)"
        );
        state.ctx.metadata.insecure_overrides.push(InsecureOverride {
            at: Utc::now(),
            findings: summaries,
        });
        Ok(format!("{summary}; overridden by allow_insecure"))
    }

    async fn deploy(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::Deployment;
        let network = state.network.ok_or_else(|| Failure::missing("network", stage))?;
        let compiled = state.compiled.clone().ok_or_else(|| Failure::missing("compiled artifact", stage))?;
        let args = state.ctx.request.constructor_args.clone();

        let receipt = self
            .call(stage, self.adapters.deployer.deploy(&compiled, &args, network))
            .await?;
        if !receipt.has_valid_address() {
            return Err(Failure::fatal(
                ErrorKind::Unknown,
                format!("deployer returned no valid address ({:?})", receipt.address),
            ));
        }

        state.ctx.artifacts.deployment = Some(DeploymentRef {
            address: receipt.address.clone(),
            tx_hash: receipt.tx_hash.clone(),
            network,
        });
        let output = format!("{} at {} on {network}", compiled.name, receipt.address);
        state.receipt = Some(receipt);
        Ok(output)
    }

    async fn verify(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::Verification;
        let network = state.network.ok_or_else(|| Failure::missing("network", stage))?;
        let compiled = state.compiled.clone().ok_or_else(|| Failure::missing("compiled artifact", stage))?;
        let address = state
            .receipt
            .as_ref()
            .map(|r| r.address.clone())
            .ok_or_else(|| Failure::missing("deployment", stage))?;

        let status = self
            .call(stage, self.adapters.verifier.verify(&address, &compiled, network))
            .await?;
        state.ctx.artifacts.verification_status = Some(status.clone());
        Ok(status)
    }

    async fn test(&self, state: &mut RunState) -> Result<String, Failure> {
        let stage = Stage::Testing;
        let network = state.network.ok_or_else(|| Failure::missing("network", stage))?;
        let receipt = state.receipt.clone().ok_or_else(|| Failure::missing("deployment", stage))?;
        let ws = state.workspace.clone().ok_or_else(|| Failure::missing("workspace", stage))?;
        let name = state
            .contract_name()
            .map(str::to_string)
            .ok_or_else(|| Failure::missing("contract name", stage))?;

        let test_source = ws.write_smoke_test(&name).map_err(Failure::infra)?;
        let deps = self
            .timed(stage, self.resolver.resolve(&test_source, ws.root()))
            .await?
            .map_err(|e| Failure::classified(e.to_string()))?;
        merge_dependencies(&mut state.ctx.dependencies, deps);

        self.checkpoint(stage)?;
        let report = self
            .call(stage, self.adapters.tester.run_tests(ws.root(), &receipt, network))
            .await?;
        state.ctx.artifacts.test_report = Some(TestSummary {
            passed: report.passed,
            failed: report.failed,
        });
        if report.executed() == 0 {
            return Err(Failure::fatal(ErrorKind::Unknown, "no tests were executed"));
        }
        if report.failed > 0 {
            return Err(Failure::fatal(
                ErrorKind::Unknown,
                format!("{} of {} test(s) failed", report.failed, report.executed()),
            ));
        }
        Ok(format!("{} test(s) passed", report.passed))
    }

    fn output(&self, state: &mut RunState) -> Result<String, Failure> {
        let ws = state
            .workspace
            .clone()
            .ok_or_else(|| Failure::missing("workspace", Stage::Output))?;
        let status = if state.warnings {
            WorkflowStatus::SucceededWithWarnings
        } else {
            WorkflowStatus::Succeeded
        };
        let output = WorkflowOutput {
            workflow_id: state.ctx.workflow_id(),
            status,
            contract_name: state.contract_name(),
            network: state.network,
            artifacts: &state.ctx.artifacts,
            dependencies: &state.ctx.dependencies,
        };
        let path = ws.write_result(&output).map_err(Failure::infra)?;
        let text = format!("wrote {}", path.display());
        state.ctx.artifacts.output_path = Some(path);
        Ok(text)
    }

    fn finish(&self, mut state: RunState, end: StageEnd) -> Result<WorkflowResult, OrchestratorError> {
        let id = state.ctx.workflow_id();
        let (status, error, suggestion) = match end {
            StageEnd::Passed | StageEnd::Warned => {
                let status = if state.warnings {
                    WorkflowStatus::SucceededWithWarnings
                } else {
                    WorkflowStatus::Succeeded
                };
                (status, None, None)
            }
            StageEnd::Failed { error, guidance } => {
                let suggestion = guidance.unwrap_or_else(|| error.suggestion());
                (WorkflowStatus::Failed, Some(error), Some(suggestion))
            }
            StageEnd::Cancelled(stage) => {
                let error = PipelineError::Cancelled { stage };
                let suggestion = error.suggestion();
                (WorkflowStatus::Cancelled, Some(error), Some(suggestion))
            }
        };

        let bundle = if status == WorkflowStatus::Cancelled {
            self.contexts.persist(&state.ctx)?;
            None
        } else {
            let failed_stage = error.as_ref().map(PipelineError::stage);
            Some(
                self.contexts
                    .finalize(&mut state.ctx, status, failed_stage, suggestion.clone())?,
            )
        };

        info!(workflow_id = %id, %status, "Workflow finished");
        Ok(WorkflowResult {
            workflow_id: id,
            status,
            error,
            suggestion,
            context: state.ctx,
            bundle,
        })
    }
}

async fn timeout_opt<F: Future<Output = Option<String>>>(fut: F) -> Option<String> {
    tokio::time::timeout(VERSION_QUERY_TIMEOUT, fut).await.ok().flatten()
}

fn project_root(state: &RunState, stage: Stage) -> Result<PathBuf, Failure> {
    state
        .workspace
        .as_ref()
        .map(|w| w.root().to_path_buf())
        .ok_or_else(|| Failure::missing("workspace", stage))
}

/// The preferred contract if the source declares it, otherwise the last
/// declared (non-abstract) contract.
fn declared_contract(source: &str, preferred: &str) -> Option<String> {
    let names: Vec<&str> = CONTRACT_DECL
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if names.contains(&preferred) {
        return Some(preferred.to_string());
    }
    names.last().map(|n| n.to_string())
}

/// Replace entries by name, append new ones.
fn merge_dependencies(existing: &mut Vec<DependencyDescriptor>, incoming: Vec<DependencyDescriptor>) {
    for dep in incoming {
        match existing.iter_mut().find(|d| d.name == dep.name) {
            Some(slot) => {
                let attempts = slot.install_attempts + dep.install_attempts;
                *slot = dep;
                slot.install_attempts = attempts;
            }
            None => existing.push(dep),
        }
    }
}

/// A handler that knows the installed library majors.
fn handler_for(deps: &[DependencyDescriptor]) -> SelfHealingErrorHandler {
    let mut versions = LibraryVersions::new();
    for dep in deps {
        if let Some(major) = catalog::library_by_name(&dep.name).and_then(|l| l.major_version()) {
            versions.set(&dep.name, major);
        }
    }
    SelfHealingErrorHandler::new().with_library_versions(versions)
}
