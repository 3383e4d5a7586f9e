//! Pipeline configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then `SOLFORGE_*`
//! environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solforge_engine::deps::ResolverConfig;
use solforge_engine::retry::{Backoff, RetryPolicy};
use solforge_engine::Stage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "solforge.toml";

/// Per-adapter-call timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub generation_secs: u64,
    pub dependency_secs: u64,
    pub compilation_secs: u64,
    pub audit_secs: u64,
    pub deployment_secs: u64,
    pub verification_secs: u64,
    pub testing_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            generation_secs: 180,
            dependency_secs: 600,
            compilation_secs: 300,
            audit_secs: 300,
            deployment_secs: 180,
            verification_secs: 180,
            testing_secs: 300,
        }
    }
}

impl StageTimeouts {
    /// Timeout for the adapter call a stage makes. Stages without one get a
    /// minute.
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Generation => self.generation_secs,
            Stage::DependencyResolution => self.dependency_secs,
            Stage::Compilation => self.compilation_secs,
            Stage::Auditing => self.audit_secs,
            Stage::Deployment => self.deployment_secs,
            Stage::Verification => self.verification_secs,
            Stage::Testing => self.testing_secs,
            Stage::Preflight | Stage::InputParsing | Stage::Output => 60,
        };
        Duration::from_secs(secs.max(1))
    }
}

/// OpenAI-compatible chat-completions endpoint used for generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// External tool commands. Each is split with shell-word rules, so
/// `"docker run --rm slither"` works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub forge: String,
    pub slither: String,
    /// Explorer API key for verification
    #[serde(skip_serializing)]
    pub explorer_api_key: Option<String>,
    /// Deployer key; anvil falls back to its first dev account
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            forge: "forge".into(),
            slither: "slither".into(),
            explorer_api_key: None,
            private_key: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub timeouts: StageTimeouts,
    /// Install attempts per library before the workflow fails
    pub install_attempts: u32,
    pub install_backoff: Backoff,
    pub lock_timeout_secs: u64,
    /// Parent of the per-workflow project directories
    pub work_root: PathBuf,
    /// Where contexts and diagnostic bundles are persisted
    pub state_dir: PathBuf,
    /// Shared library cache
    pub cache_dir: PathBuf,
    pub default_network: String,
    /// Network name → RPC URL
    pub rpc_urls: BTreeMap<String, String>,
    pub generator: GeneratorConfig,
    pub tools: ToolConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let base = PathBuf::from(".solforge");
        let mut rpc_urls = BTreeMap::new();
        rpc_urls.insert("anvil".to_string(), "http://127.0.0.1:8545".to_string());
        Self {
            retry: RetryPolicy::default(),
            timeouts: StageTimeouts::default(),
            install_attempts: 3,
            install_backoff: Backoff::Fixed { delay_ms: 2_000 },
            lock_timeout_secs: 600,
            work_root: base.join("work"),
            state_dir: base.join("state"),
            cache_dir: base.join("cache"),
            default_network: "anvil".into(),
            rpc_urls,
            generator: GeneratorConfig::default(),
            tools: ToolConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then `path` (or `./solforge.toml` if present), then env.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML {}", path.display()))
    }

    /// Apply `SOLFORGE_*` overrides. Takes a lookup so tests need not touch
    /// the process environment.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = u32_var(&var, "SOLFORGE_MAX_RETRIES") {
            self.retry.max_retries = v;
        }
        if let Some(v) = u64_var(&var, "SOLFORGE_BACKOFF_MS") {
            self.retry.transient_backoff = Backoff::Fixed { delay_ms: v };
        }
        if let Some(v) = u32_var(&var, "SOLFORGE_INSTALL_ATTEMPTS").filter(|v| *v > 0) {
            self.install_attempts = v;
        }
        if let Some(v) = u64_var(&var, "SOLFORGE_LOCK_TIMEOUT_SECS").filter(|v| *v > 0) {
            self.lock_timeout_secs = v;
        }
        if let Some(v) = var("SOLFORGE_WORK_ROOT") {
            self.work_root = PathBuf::from(v);
        }
        if let Some(v) = var("SOLFORGE_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SOLFORGE_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SOLFORGE_NETWORK") {
            self.default_network = v;
        }
        if let Some(v) = var("SOLFORGE_GENERATOR_URL") {
            self.generator.url = v;
        }
        if let Some(v) = var("SOLFORGE_GENERATOR_MODEL") {
            self.generator.model = v;
        }
        if let Some(v) = var("SOLFORGE_GENERATOR_API_KEY") {
            self.generator.api_key = Some(v);
        }
        if let Some(v) = var("SOLFORGE_FORGE") {
            self.tools.forge = v;
        }
        if let Some(v) = var("SOLFORGE_SLITHER") {
            self.tools.slither = v;
        }
        if let Some(v) = var("SOLFORGE_EXPLORER_API_KEY") {
            self.tools.explorer_api_key = Some(v);
        }
        if let Some(v) = var("SOLFORGE_PRIVATE_KEY") {
            self.tools.private_key = Some(v);
        }
        for network in solforge_engine::Network::ALL {
            let key = format!(
                "SOLFORGE_RPC_{}",
                network.name().replace('-', "_").to_ascii_uppercase()
            );
            if let Some(url) = var(&key) {
                self.rpc_urls.insert(network.name().to_string(), url);
            }
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_dir: self.cache_dir.clone(),
            install_attempts: self.install_attempts,
            install_backoff: self.install_backoff,
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
        }
    }

    pub fn rpc_url(&self, network: &str) -> Option<&str> {
        self.rpc_urls.get(network).map(String::as_str)
    }
}

fn u32_var(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u32> {
    var(key).and_then(|v| v.trim().parse::<u32>().ok())
}

fn u64_var(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    var(key).and_then(|v| v.trim().parse::<u64>().ok())
}
