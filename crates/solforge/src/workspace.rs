//! Per-workflow project directories
//!
//! Each workflow owns `<work_root>/<workflow_id>/`, a minimal Foundry project.
//! Every write replaces the previous file, so re-running a stage leaves the
//! same tree behind.

use crate::adapters::CompiledContract;
use anyhow::{Context, Result};
use solforge_engine::fs_atomic::{atomic_write_file, atomic_write_json};
use solforge_engine::WorkflowId;
use std::path::{Path, PathBuf};

const FOUNDRY_TOML: &str = r#"[profile.default]
src = "src"
out = "out"
libs = ["lib"]
test = "test"
"#;

pub const RESULT_FILE: &str = "result.json";

/// Compiled artifact pointer kept for resumed runs
const COMPILED_FILE: &str = "compiled.json";

/// Env var the smoke test reads the deployed address from.
pub const DEPLOYED_ADDRESS_VAR: &str = "SOLFORGE_DEPLOYED_ADDRESS";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn path_for(work_root: &Path, id: WorkflowId) -> PathBuf {
        work_root.join(id.to_string())
    }

    /// Create (or reopen) the project directory.
    pub fn open(work_root: &Path, id: WorkflowId) -> Result<Self> {
        let root = Self::path_for(work_root, id);
        for dir in ["src", "test"] {
            std::fs::create_dir_all(root.join(dir))
                .with_context(|| format!("Failed to create {}", root.join(dir).display()))?;
        }
        let foundry = root.join("foundry.toml");
        if !foundry.exists() {
            atomic_write_file(&foundry, FOUNDRY_TOML.as_bytes())
                .with_context(|| format!("Failed to write {}", foundry.display()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self, contract_name: &str) -> PathBuf {
        self.root.join("src").join(format!("{contract_name}.sol"))
    }

    pub fn test_path(&self, contract_name: &str) -> PathBuf {
        self.root.join("test").join(format!("{contract_name}.t.sol"))
    }

    pub fn result_path(&self) -> PathBuf {
        self.root.join(RESULT_FILE)
    }

    pub fn write_source(&self, contract_name: &str, source: &str) -> Result<PathBuf> {
        let path = self.source_path(contract_name);
        atomic_write_file(&path, source.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_source(&self, contract_name: &str) -> Result<Option<String>> {
        let path = self.source_path(contract_name);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Write the post-deployment smoke test and return its text.
    pub fn write_smoke_test(&self, contract_name: &str) -> Result<String> {
        let text = smoke_test(contract_name, DEPLOYED_ADDRESS_VAR);
        let path = self.test_path(contract_name);
        atomic_write_file(&path, text.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(text)
    }

    pub fn write_compiled(&self, contract: &CompiledContract) -> Result<()> {
        let path = self.root.join(COMPILED_FILE);
        atomic_write_json(&path, contract).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn read_compiled(&self) -> Result<Option<CompiledContract>> {
        let path = self.root.join(COMPILED_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("Corrupt {}", path.display()))
    }

    pub fn write_result<T: serde::Serialize>(&self, value: &T) -> Result<PathBuf> {
        let path = self.result_path();
        atomic_write_json(&path, value).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Checks the deployed address has code on the forked chain.
fn smoke_test(contract_name: &str, address_var: &str) -> String {
    format!(
        r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

import {{Test}} from "forge-std/Test.sol";

contract {contract_name}DeploymentTest is Test {{
    function test_deployed_code_present() public view {{
        address deployed = vm.envAddress("{address_var}");
        assertGt(deployed.code.length, 0);
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let id = WorkflowId::new();
        let ws = Workspace::open(dir.path(), id).unwrap();
        assert_eq!(ws.root(), dir.path().join(id.to_string()));
        assert!(ws.root().join("foundry.toml").exists());
        assert_eq!(ws.read_source("Token").unwrap(), None);

        ws.write_source("Token", "contract Token {}\n").unwrap();
        ws.write_source("Token", "contract Token { uint256 x; }\n").unwrap();
        assert_eq!(
            ws.read_source("Token").unwrap().unwrap(),
            "contract Token { uint256 x; }\n"
        );
        let files: Vec<_> = std::fs::read_dir(ws.root().join("src")).unwrap().collect();
        assert_eq!(files.len(), 1);

        // reopening keeps content
        let again = Workspace::open(dir.path(), id).unwrap();
        assert!(again.read_source("Token").unwrap().is_some());
    }

    #[test]
    fn test_smoke_test_imports_forge_std() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path(), WorkflowId::new()).unwrap();
        let text = ws.write_smoke_test("Token").unwrap();
        assert!(text.contains("import {Test} from \"forge-std/Test.sol\";"));
        assert!(text.contains("contract TokenDeploymentTest is Test {"));
        assert!(text.contains("vm.envAddress(\"SOLFORGE_DEPLOYED_ADDRESS\")"));
        assert!(ws.test_path("Token").exists());
    }

    #[test]
    fn test_compiled_round_trip_for_resume() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path(), WorkflowId::new()).unwrap();
        assert!(ws.read_compiled().unwrap().is_none());
        let contract = CompiledContract {
            name: "Token".into(),
            project_dir: ws.root().to_path_buf(),
            source_path: "src/Token.sol".into(),
            artifact_path: ws.root().join("out/Token.sol/Token.json"),
            bytecode: "0x6080".into(),
            abi: serde_json::json!([]),
        };
        ws.write_compiled(&contract).unwrap();
        assert_eq!(ws.read_compiled().unwrap(), Some(contract));
    }
}
