//! External collaborator seams
//!
//! The orchestrator only sees these traits. Errors are `anyhow::Error`; the
//! orchestrator classifies them by their rendered text, so adapters should
//! keep the tool's own output in the error chain.

pub mod foundry;
pub mod generator;
pub mod slither;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solforge_engine::deps::PackageManager;
use solforge_engine::Network;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use foundry::Forge;
pub use generator::ChatGenerator;
pub use slither::Slither;

/// One compiled contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledContract {
    pub name: String,
    /// Project directory the artifact was built in
    pub project_dir: PathBuf,
    /// Source file relative to the project, e.g. `src/Token.sol`
    pub source_path: PathBuf,
    pub artifact_path: PathBuf,
    /// Creation bytecode, `0x`-prefixed
    pub bytecode: String,
    #[serde(default)]
    pub abi: serde_json::Value,
}

impl CompiledContract {
    /// `src/Token.sol:Token`
    pub fn contract_id(&self) -> String {
        format!("{}:{}", self.source_path.display(), self.name)
    }

    /// True when there is deployable code.
    pub fn has_bytecode(&self) -> bool {
        let code = self.bytecode.trim_start_matches("0x");
        !code.is_empty() && code.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub contracts: Vec<CompiledContract>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl CompileOutput {
    pub fn find(&self, name: &str) -> Option<&CompiledContract> {
        self.contracts.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Optimization,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            "optimization" => Self::Optimization,
            _ => Self::Informational,
        }
    }

    /// Findings at this level stop the pipeline unless overridden.
    pub fn is_blocking(self) -> bool {
        self == Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Informational => "informational",
            Self::Optimization => "optimization",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub severity: Severity,
    pub summary: String,
}

impl AuditFinding {
    pub fn new(severity: Severity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    pub address: String,
    pub tx_hash: String,
}

impl DeploymentReceipt {
    /// `0x` followed by 40 hex digits.
    pub fn has_valid_address(&self) -> bool {
        let Some(hex) = self.address.strip_prefix("0x") else {
            return false;
        };
        hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub output: String,
}

impl TestReport {
    pub fn executed(&self) -> u32 {
        self.passed + self.failed
    }
}

/// Turns a prompt into contract source.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, context_docs: &[String]) -> Result<String>;

    async fn version(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, project_dir: &Path) -> Result<CompileOutput>;

    async fn version(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, project_dir: &Path, source: &str) -> Result<Vec<AuditFinding>>;

    async fn version(&self) -> Option<String> {
        None
    }
}

/// Only ever handed an allow-listed [`Network`].
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        artifact: &CompiledContract,
        constructor_args: &[String],
        network: Network,
    ) -> Result<DeploymentReceipt>;
}

#[async_trait]
pub trait ContractVerifier: Send + Sync {
    /// Returns the explorer's status text.
    async fn verify(&self, address: &str, artifact: &CompiledContract, network: Network) -> Result<String>;
}

#[async_trait]
pub trait Tester: Send + Sync {
    async fn run_tests(
        &self,
        project_dir: &Path,
        deployment: &DeploymentReceipt,
        network: Network,
    ) -> Result<TestReport>;
}

/// The full set of collaborators one orchestrator drives.
#[derive(Clone)]
pub struct Adapters {
    pub generator: Arc<dyn Generator>,
    pub package_manager: Arc<dyn PackageManager>,
    pub compiler: Arc<dyn Compiler>,
    pub auditor: Arc<dyn Auditor>,
    pub deployer: Arc<dyn Deployer>,
    pub verifier: Arc<dyn ContractVerifier>,
    pub tester: Arc<dyn Tester>,
}
