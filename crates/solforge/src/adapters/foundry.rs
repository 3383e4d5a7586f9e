//! Foundry (`forge`) backed adapters
//!
//! One `Forge` value serves as package manager, compiler, deployer, verifier
//! and test runner. Every call shells out; failures carry the tool's stdout
//! and stderr so the healing rules see the real compiler text.

use crate::adapters::{
    CompileOutput, CompiledContract, Compiler, ContractVerifier, DeploymentReceipt, Deployer,
    TestReport, Tester,
};
use crate::config::PipelineConfig;
use crate::workspace::DEPLOYED_ADDRESS_VAR;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use solforge_engine::deps::{LibrarySpec, PackageManager, PackageManagerError};
use solforge_engine::Network;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info};

/// First account of a stock anvil node.
const ANVIL_DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

static TEST_SUMMARY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) tests? passed, (\d+) failed").unwrap());

pub struct Forge {
    program: String,
    base_args: Vec<String>,
    rpc_urls: BTreeMap<String, String>,
    private_key: Option<String>,
    explorer_api_key: Option<String>,
}

impl Forge {
    /// `command` is split with shell-word rules.
    pub fn new(command: &str) -> Result<Self> {
        let mut words = shlex::split(command)
            .filter(|w| !w.is_empty())
            .with_context(|| format!("Invalid forge command: {command:?}"))?;
        let program = words.remove(0);
        Ok(Self {
            program,
            base_args: words,
            rpc_urls: BTreeMap::new(),
            private_key: None,
            explorer_api_key: None,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut forge = Self::new(&config.tools.forge)?;
        forge.rpc_urls = config.rpc_urls.clone();
        forge.private_key = config.tools.private_key.clone();
        forge.explorer_api_key = config.tools.explorer_api_key.clone();
        Ok(forge)
    }

    fn rpc_url(&self, network: Network) -> Result<&str> {
        self.rpc_urls
            .get(network.name())
            .map(String::as_str)
            .with_context(|| format!("No RPC URL configured for network {network}"))
    }

    fn private_key(&self, network: Network) -> Result<&str> {
        match (&self.private_key, network) {
            (Some(key), _) => Ok(key),
            (None, Network::Anvil) => Ok(ANVIL_DEV_KEY),
            (None, _) => bail!("No private key configured for {network}; set SOLFORGE_PRIVATE_KEY"),
        }
    }

    /// Run forge and return stdout. A non-zero exit is an error carrying
    /// both output streams.
    async fn run(&self, args: &[String], cwd: &Path, envs: &[(&str, &str)]) -> Result<String> {
        let output = self.exec(args, cwd, envs).await?;
        if !output.status.success() {
            bail!(
                "forge {} failed ({}):\n{}{}",
                args.first().map(String::as_str).unwrap_or(""),
                output.status,
                output.stderr,
                output.stdout
            );
        }
        Ok(output.stdout)
    }

    async fn exec(&self, args: &[String], cwd: &Path, envs: &[(&str, &str)]) -> Result<ProcessOutput> {
        debug!(program = %self.program, ?args, cwd = %cwd.display(), "Running forge");
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args).current_dir(cwd).kill_on_drop(true);
        for (k, v) in envs {
            cmd.env(k, v);
        }
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.program))?;
        Ok(ProcessOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn query_version(&self) -> Option<String> {
        let out = self.exec(&["--version".to_string()], Path::new("."), &[]).await.ok()?;
        out.stdout.lines().next().map(|l| l.trim().to_string())
    }
}

struct ProcessOutput {
    status: std::process::ExitStatus,
    stdout: String,
    stderr: String,
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl PackageManager for Forge {
    async fn install(&self, cache_dir: &Path, library: &LibrarySpec) -> Result<(), PackageManagerError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| PackageManagerError::new(e.to_string()))?;
        if !cache_dir.join(".git").exists() {
            let status = Command::new("git")
                .arg("init")
                .arg("--quiet")
                .current_dir(cache_dir)
                .status()
                .await
                .map_err(|e| PackageManagerError::new(format!("git init failed: {e}")))?;
            if !status.success() {
                return Err(PackageManagerError::new(format!("git init failed ({status})")));
            }
        }
        let reference = library.source_ref();
        self.run(&args(["install", &reference]), cache_dir, &[])
            .await
            .map_err(|e| PackageManagerError::new(format!("{e:#}")))?;
        info!(library = library.name, %reference, "forge install completed");
        Ok(())
    }

    async fn list_installed(&self, cache_dir: &Path) -> Result<BTreeSet<String>, PackageManagerError> {
        installed_libraries(&cache_dir.join("lib")).map_err(|e| PackageManagerError::new(e.to_string()))
    }

    async fn version(&self) -> Option<String> {
        self.query_version().await
    }
}

/// Non-empty directories under `lib/`.
fn installed_libraries(lib_dir: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !lib_dir.is_dir() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(lib_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if std::fs::read_dir(entry.path())?.next().is_none() {
            continue;
        }
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

#[derive(Deserialize)]
struct ArtifactFile {
    #[serde(default)]
    abi: serde_json::Value,
    bytecode: ArtifactBytecode,
}

#[derive(Deserialize)]
struct ArtifactBytecode {
    object: String,
}

/// Read `out/<File>.sol/<Name>.json` for every file under `src/`.
pub fn collect_artifacts(project_dir: &Path) -> Result<Vec<CompiledContract>> {
    let src = project_dir.join("src");
    let out = project_dir.join("out");
    let mut contracts = Vec::new();
    let mut files: Vec<PathBuf> = std::fs::read_dir(&src)
        .with_context(|| format!("Failed to read {}", src.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|x| x == "sol"))
        .collect();
    files.sort();

    for file in files {
        let Some(file_name) = file.file_name() else {
            continue;
        };
        let artifact_dir = out.join(file_name);
        if !artifact_dir.is_dir() {
            continue;
        }
        let mut artifacts: Vec<PathBuf> = std::fs::read_dir(&artifact_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        artifacts.sort();
        for artifact_path in artifacts {
            let Some(name) = artifact_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&artifact_path)
                .with_context(|| format!("Failed to read artifact {}", artifact_path.display()))?;
            let parsed: ArtifactFile = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed artifact {}", artifact_path.display()))?;
            contracts.push(CompiledContract {
                name: name.to_string(),
                project_dir: project_dir.to_path_buf(),
                source_path: PathBuf::from("src").join(file_name),
                artifact_path: artifact_path.clone(),
                bytecode: parsed.bytecode.object,
                abi: parsed.abi,
            });
        }
    }
    Ok(contracts)
}

#[async_trait]
impl Compiler for Forge {
    async fn compile(&self, project_dir: &Path) -> Result<CompileOutput> {
        let root = project_dir.display().to_string();
        let stdout = self.run(&args(["build", "--root", &root]), project_dir, &[]).await?;
        let warnings = stdout
            .lines()
            .filter(|l| l.trim_start().starts_with("Warning"))
            .map(|l| l.trim().to_string())
            .collect();
        Ok(CompileOutput {
            contracts: collect_artifacts(project_dir)?,
            warnings,
        })
    }

    async fn version(&self) -> Option<String> {
        self.query_version().await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOutput {
    deployed_to: String,
    transaction_hash: String,
}

/// Pull the JSON object out of `forge create --json` output.
fn parse_create_output(stdout: &str) -> Result<DeploymentReceipt> {
    let parsed = stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<CreateOutput>(l).ok())
        .with_context(|| format!("forge create returned no deployment JSON:\n{stdout}"))?;
    Ok(DeploymentReceipt {
        address: parsed.deployed_to,
        tx_hash: parsed.transaction_hash,
    })
}

#[async_trait]
impl Deployer for Forge {
    async fn deploy(
        &self,
        artifact: &CompiledContract,
        constructor_args: &[String],
        network: Network,
    ) -> Result<DeploymentReceipt> {
        let root = artifact.project_dir.display().to_string();
        let mut argv = args([
            "create",
            "--root",
            &root,
            "--rpc-url",
            self.rpc_url(network)?,
            "--private-key",
            self.private_key(network)?,
            "--broadcast",
            "--json",
        ]);
        argv.push(artifact.contract_id());
        if !constructor_args.is_empty() {
            argv.push("--constructor-args".into());
            argv.extend(constructor_args.iter().cloned());
        }
        let stdout = self.run(&argv, &artifact.project_dir, &[]).await?;
        parse_create_output(&stdout)
    }
}

#[async_trait]
impl ContractVerifier for Forge {
    async fn verify(&self, address: &str, artifact: &CompiledContract, network: Network) -> Result<String> {
        if !network.supports_verification() {
            bail!("No explorer verification API for {network}");
        }
        let key = self
            .explorer_api_key
            .as_deref()
            .context("No explorer API key configured; set SOLFORGE_EXPLORER_API_KEY")?;
        let root = artifact.project_dir.display().to_string();
        let chain = network.chain_id().to_string();
        let mut argv = args([
            "verify-contract",
            "--root",
            &root,
            "--chain",
            &chain,
            "--etherscan-api-key",
            key,
            "--watch",
            address,
        ]);
        argv.push(artifact.contract_id());
        let stdout = self.run(&argv, &artifact.project_dir, &[]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("submitted")
            .to_string())
    }
}

/// Passed/failed counts from `forge test` output, summed over suites.
pub fn parse_test_summary(output: &str) -> Option<(u32, u32)> {
    let mut found = false;
    let (mut passed, mut failed) = (0u32, 0u32);
    for caps in TEST_SUMMARY_PATTERN.captures_iter(output) {
        found = true;
        passed += caps[1].parse::<u32>().unwrap_or(0);
        failed += caps[2].parse::<u32>().unwrap_or(0);
    }
    found.then_some((passed, failed))
}

#[async_trait]
impl Tester for Forge {
    async fn run_tests(
        &self,
        project_dir: &Path,
        deployment: &DeploymentReceipt,
        network: Network,
    ) -> Result<TestReport> {
        let root = project_dir.display().to_string();
        let argv = args(["test", "--root", &root, "--fork-url", self.rpc_url(network)?, "-vv"]);
        // forge test exits non-zero on failing tests; the summary still counts
        let output = self
            .exec(&argv, project_dir, &[(DEPLOYED_ADDRESS_VAR, deployment.address.as_str())])
            .await?;
        let combined = format!("{}{}", output.stdout, output.stderr);
        let Some((passed, failed)) = parse_test_summary(&combined) else {
            bail!("forge test produced no summary ({}):\n{combined}", output.status);
        };
        Ok(TestReport {
            passed,
            failed,
            output: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_split() {
        let forge = Forge::new("docker run --rm 'foundry image' forge").unwrap();
        assert_eq!(forge.program, "docker");
        assert_eq!(forge.base_args, vec!["run", "--rm", "foundry image", "forge"]);
        assert!(Forge::new("").is_err());
    }

    #[test]
    fn test_anvil_key_fallback_only_on_anvil() {
        let forge = Forge::new("forge").unwrap();
        assert_eq!(forge.private_key(Network::Anvil).unwrap(), ANVIL_DEV_KEY);
        let err = forge.private_key(Network::Sepolia).unwrap_err();
        assert!(err.to_string().contains("private key"));
    }

    #[test]
    fn test_parse_create_output() {
        let stdout = "Compiling...\n{\"deployer\":\"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266\",\"deployedTo\":\"0x5FbDB2315678afecb367f032d93F642f64180aa3\",\"transactionHash\":\"0x1234\"}\n";
        let receipt = parse_create_output(stdout).unwrap();
        assert!(receipt.has_valid_address());
        assert_eq!(receipt.tx_hash, "0x1234");
        assert!(parse_create_output("nothing here").is_err());
    }

    #[test]
    fn test_parse_test_summary() {
        let out = "Ran 2 tests for test/Token.t.sol:TokenTest\n\
                   Suite result: ok. 2 passed; 0 failed; 0 skipped\n\
                   Ran 1 test suite in 10ms: 2 tests passed, 0 failed, 0 skipped (2 total tests)\n";
        assert_eq!(parse_test_summary(out), Some((2, 0)));
        assert_eq!(
            parse_test_summary("Ran 1 test suite: 0 tests passed, 1 failed, 0 skipped"),
            Some((0, 1))
        );
        assert_eq!(parse_test_summary("error: no tests"), None);
    }

    #[test]
    fn test_collect_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("out/Token.sol")).unwrap();
        std::fs::write(root.join("src/Token.sol"), "contract Token {}").unwrap();
        std::fs::write(
            root.join("out/Token.sol/Token.json"),
            r#"{"abi":[],"bytecode":{"object":"0x6080"}}"#,
        )
        .unwrap();

        let contracts = collect_artifacts(root).unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].name, "Token");
        assert_eq!(contracts[0].contract_id(), "src/Token.sol:Token");
        assert!(contracts[0].has_bytecode());
    }

    #[test]
    fn test_installed_libraries_skip_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        std::fs::create_dir_all(lib.join("forge-std/src")).unwrap();
        std::fs::create_dir_all(lib.join("half-installed")).unwrap();
        let names = installed_libraries(&lib).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["forge-std"]);
    }
}
