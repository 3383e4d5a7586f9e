//! Shared fakes for the pipeline integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mockall::mock;
use solforge::adapters::{
    AuditFinding, Auditor, CompileOutput, CompiledContract, Compiler, ContractVerifier, Deployer,
    DeploymentReceipt, Generator, TestReport, Tester,
};
use solforge::{Adapters, PipelineConfig, WorkflowOrchestrator};
use solforge_engine::deps::{LibrarySpec, PackageManager, PackageManagerError};
use solforge_engine::retry::Backoff;
use solforge_engine::{FileContextStore, Network, RetryPolicy};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const TOKEN_SOURCE: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

import {ERC20} from "@openzeppelin/contracts/token/ERC20/ERC20.sol";
import {Ownable} from "@openzeppelin/contracts/access/Ownable.sol";

contract Token is ERC20, Ownable {
    constructor() ERC20("Token", "TKN") Ownable(msg.sender) {}

    function mint(address to, uint256 amount) external onlyOwner {
        _mint(to, amount);
    }

    function totalMinted() public view override returns (uint256) {
        return totalSupply();
    }
}
"#;

pub const DEPLOYED_AT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// 1-based line of the first line containing `needle`.
pub fn line_of(source: &str, needle: &str) -> usize {
    source
        .lines()
        .position(|l| l.contains(needle))
        .map(|i| i + 1)
        .expect("needle present")
}

/// solc's report for an `override` that overrides nothing.
pub fn override_conflict_error(source: &str) -> String {
    let line = line_of(source, "function totalMinted");
    let text = source.lines().nth(line - 1).unwrap_or_default();
    format!(
        "Error: Compiler run failed:\nError (7792): Function has override specified but does not override anything.\n  --> src/Token.sol:{line}:42:\n   |\n{line} | {text}\n   |                                          ^^^^^^^^\n"
    )
}

pub fn source_not_found_error(import: &str) -> String {
    format!("Error (6275): Source \"{import}\" not found: File not found.\n --> src/Token.sol:4:1:\n")
}

/// Isolated work/state/cache dirs and a config that never sleeps.
pub struct Harness {
    pub dir: TempDir,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir)
    }

    pub fn in_dir(dir: TempDir) -> Self {
        let mut config = PipelineConfig::default();
        config.work_root = dir.path().join("work");
        config.state_dir = dir.path().join("state");
        config.cache_dir = dir.path().join("cache");
        config.retry = RetryPolicy::default().with_backoff(Backoff::Fixed { delay_ms: 0 });
        config.install_backoff = Backoff::Fixed { delay_ms: 0 };
        config.lock_timeout_secs = 30;
        Self { dir, config }
    }

    pub fn store(&self) -> Arc<FileContextStore> {
        Arc::new(FileContextStore::new(&self.config.state_dir))
    }

    pub fn orchestrator(&self, adapters: Adapters) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(self.config.clone(), adapters, self.store())
    }
}

// ── Generator ────────────────────────────────────────────────────────

pub struct FakeGenerator {
    pub source: String,
    pub calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, _prompt: &str, _context_docs: &[String]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.source.clone())
    }

    async fn version(&self) -> Option<String> {
        Some("fake-model".to_string())
    }
}

/// Rejects every request with the same message.
pub struct FailingGenerator {
    pub message: String,
    pub calls: AtomicUsize,
}

impl FailingGenerator {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _prompt: &str, _context_docs: &[String]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!(self.message.clone()))
    }
}

// ── Package manager ──────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePackageManager {
    installed: Mutex<BTreeSet<String>>,
    installs: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pub install_delay: Duration,
    cancel_on: Option<(String, CancellationToken)>,
}

impl FakePackageManager {
    pub fn with_delay(install_delay: Duration) -> Self {
        Self {
            install_delay,
            ..Default::default()
        }
    }

    /// Cancel `token` while installing `library`; the install still succeeds.
    pub fn cancelling_on(library: &str, token: CancellationToken) -> Self {
        Self {
            cancel_on: Some((library.to_string(), token)),
            ..Default::default()
        }
    }

    /// Library names in install order, repeats included.
    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }

    pub fn installs_of(&self, name: &str) -> usize {
        self.installs().iter().filter(|n| *n == name).count()
    }

    /// Most installs ever running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Drop a library from the cache, as if someone wiped it.
    pub fn evict(&self, name: &str) {
        self.installed.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn install(&self, _cache_dir: &Path, library: &LibrarySpec) -> Result<(), PackageManagerError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.install_delay.is_zero() {
            tokio::time::sleep(self.install_delay).await;
        }
        if let Some((name, token)) = &self.cancel_on {
            if name.as_str() == library.name {
                token.cancel();
            }
        }
        self.installs.lock().unwrap().push(library.name.to_string());
        self.installed.lock().unwrap().insert(library.name.to_string());
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_installed(&self, _cache_dir: &Path) -> Result<BTreeSet<String>, PackageManagerError> {
        Ok(self.installed.lock().unwrap().clone())
    }

    async fn version(&self) -> Option<String> {
        Some("fake-pm 1.0".to_string())
    }
}

// ── Compiler ─────────────────────────────────────────────────────────

/// Fails with the queued messages first, then compiles. Records the source
/// it found on disk for every call.
pub struct FakeCompiler {
    contract: String,
    failures: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<String>>,
    /// Cancelled during the first call
    cancel_on_first_call: Mutex<Option<CancellationToken>>,
    /// Evicted from the package manager during the first call
    evict_on_first_call: Mutex<Option<(Arc<FakePackageManager>, String)>>,
}

impl FakeCompiler {
    pub fn new(contract: &str) -> Self {
        Self {
            contract: contract.to_string(),
            failures: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            cancel_on_first_call: Mutex::new(None),
            evict_on_first_call: Mutex::new(None),
        }
    }

    pub fn failing_with(self, messages: impl IntoIterator<Item = String>) -> Self {
        self.failures.lock().unwrap().extend(messages);
        self
    }

    pub fn cancelling(self, token: CancellationToken) -> Self {
        *self.cancel_on_first_call.lock().unwrap() = Some(token);
        self
    }

    pub fn evicting(self, pm: Arc<FakePackageManager>, library: &str) -> Self {
        *self.evict_on_first_call.lock().unwrap() = Some((pm, library.to_string()));
        self
    }

    pub fn seen_sources(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, project_dir: &Path) -> Result<CompileOutput> {
        let source_rel = format!("src/{}.sol", self.contract);
        let source = std::fs::read_to_string(project_dir.join(&source_rel))?;
        self.seen.lock().unwrap().push(source);

        if let Some(token) = self.cancel_on_first_call.lock().unwrap().take() {
            token.cancel();
        }
        if let Some((pm, library)) = self.evict_on_first_call.lock().unwrap().take() {
            pm.evict(&library);
        }
        if let Some(message) = self.failures.lock().unwrap().pop_front() {
            return Err(anyhow!(message));
        }

        Ok(CompileOutput {
            contracts: vec![CompiledContract {
                name: self.contract.clone(),
                project_dir: project_dir.to_path_buf(),
                source_path: source_rel.into(),
                artifact_path: project_dir
                    .join("out")
                    .join(format!("{}.sol", self.contract))
                    .join(format!("{}.json", self.contract)),
                bytecode: "0x608060405234801561001057600080fd5b50".to_string(),
                abi: serde_json::json!([]),
            }],
            warnings: Vec::new(),
        })
    }

    async fn version(&self) -> Option<String> {
        Some("forge 0.2.0".to_string())
    }
}

// ── Auditor ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeAuditor {
    pub findings: Vec<AuditFinding>,
}

impl FakeAuditor {
    pub fn reporting(findings: Vec<AuditFinding>) -> Self {
        Self { findings }
    }
}

#[async_trait]
impl Auditor for FakeAuditor {
    async fn audit(&self, _project_dir: &Path, _source: &str) -> Result<Vec<AuditFinding>> {
        Ok(self.findings.clone())
    }
}

/// The analyzer itself breaks; no report comes back.
pub struct BrokenAuditor {
    pub message: String,
}

#[async_trait]
impl Auditor for BrokenAuditor {
    async fn audit(&self, _project_dir: &Path, _source: &str) -> Result<Vec<AuditFinding>> {
        Err(anyhow!(self.message.clone()))
    }
}

/// Never answers the first `stalls` calls, then reports a clean audit.
pub struct StallingAuditor {
    stalls: usize,
    calls: AtomicUsize,
}

impl StallingAuditor {
    pub fn stalling(stalls: usize) -> Self {
        Self {
            stalls,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Auditor for StallingAuditor {
    async fn audit(&self, _project_dir: &Path, _source: &str) -> Result<Vec<AuditFinding>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.stalls {
            std::future::pending::<()>().await;
        }
        Ok(Vec::new())
    }
}

// ── Deployer ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingDeployer {
    networks: Mutex<Vec<Network>>,
}

impl RecordingDeployer {
    pub fn networks(&self) -> Vec<Network> {
        self.networks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(
        &self,
        _artifact: &CompiledContract,
        _constructor_args: &[String],
        network: Network,
    ) -> Result<DeploymentReceipt> {
        self.networks.lock().unwrap().push(network);
        Ok(DeploymentReceipt {
            address: DEPLOYED_AT.to_string(),
            tx_hash: "0xabc123".to_string(),
        })
    }
}

mock! {
    pub Deployer {}

    #[async_trait]
    impl Deployer for Deployer {
        async fn deploy(
            &self,
            artifact: &CompiledContract,
            constructor_args: &[String],
            network: Network,
        ) -> Result<DeploymentReceipt>;
    }
}

/// A deployer that fails the test if it is ever called.
pub fn never_deploys() -> Arc<MockDeployer> {
    let mut mock = MockDeployer::new();
    mock.expect_deploy().never();
    Arc::new(mock)
}

// ── Verifier / tester ────────────────────────────────────────────────

pub struct FakeVerifier {
    pub outcome: std::result::Result<String, String>,
    pub calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn ok() -> Self {
        Self {
            outcome: Ok("Pass - Verified".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContractVerifier for FakeVerifier {
    async fn verify(&self, _address: &str, _artifact: &CompiledContract, _network: Network) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone().map_err(|e| anyhow!(e))
    }
}

pub struct FakeTester {
    pub report: TestReport,
}

impl Default for FakeTester {
    fn default() -> Self {
        Self {
            report: TestReport {
                passed: 1,
                failed: 0,
                output: "1 tests passed, 0 failed".to_string(),
            },
        }
    }
}

#[async_trait]
impl Tester for FakeTester {
    async fn run_tests(
        &self,
        project_dir: &Path,
        deployment: &DeploymentReceipt,
        _network: Network,
    ) -> Result<TestReport> {
        anyhow::ensure!(project_dir.join("test").exists(), "no test directory");
        anyhow::ensure!(deployment.has_valid_address(), "bad deployment address");
        Ok(self.report.clone())
    }
}

// ── Wiring ───────────────────────────────────────────────────────────

/// Fakes for every adapter, each reachable for assertions.
pub struct Fakes {
    pub generator: Arc<FakeGenerator>,
    pub package_manager: Arc<FakePackageManager>,
    pub compiler: Arc<FakeCompiler>,
    pub auditor: Arc<FakeAuditor>,
    pub deployer: Arc<dyn Deployer>,
    pub verifier: Arc<FakeVerifier>,
    pub tester: Arc<FakeTester>,
}

impl Fakes {
    /// Everything succeeds with [`TOKEN_SOURCE`].
    pub fn happy() -> Self {
        Self {
            generator: Arc::new(FakeGenerator::new(TOKEN_SOURCE)),
            package_manager: Arc::new(FakePackageManager::default()),
            compiler: Arc::new(FakeCompiler::new("Token")),
            auditor: Arc::new(FakeAuditor::default()),
            deployer: Arc::new(RecordingDeployer::default()),
            verifier: Arc::new(FakeVerifier::ok()),
            tester: Arc::new(FakeTester::default()),
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            generator: self.generator.clone(),
            package_manager: self.package_manager.clone(),
            compiler: self.compiler.clone(),
            auditor: self.auditor.clone(),
            deployer: self.deployer.clone(),
            verifier: self.verifier.clone(),
            tester: self.tester.clone(),
        }
    }
}
