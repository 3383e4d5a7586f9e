//! Slither static analysis
//!
//! Only severity and a one-line summary per finding leave this module.

use crate::adapters::{AuditFinding, Auditor, Severity};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub struct Slither {
    program: String,
    base_args: Vec<String>,
}

impl Slither {
    pub fn new(command: &str) -> Result<Self> {
        let mut words = shlex::split(command)
            .filter(|w| !w.is_empty())
            .with_context(|| format!("Invalid slither command: {command:?}"))?;
        let program = words.remove(0);
        Ok(Self {
            program,
            base_args: words,
        })
    }
}

#[derive(Deserialize)]
struct SlitherOutput {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: SlitherResults,
}

#[derive(Deserialize, Default)]
struct SlitherResults {
    #[serde(default)]
    detectors: Vec<SlitherDetector>,
}

#[derive(Deserialize)]
struct SlitherDetector {
    check: String,
    impact: String,
    #[serde(default)]
    description: String,
}

/// Parse `slither --json -` output. A run that reports `success: false` is a
/// tool failure, not a clean audit.
pub fn parse_report(stdout: &str) -> Result<Vec<AuditFinding>> {
    let start = stdout
        .find('{')
        .context("slither produced no JSON report")?;
    let output: SlitherOutput =
        serde_json::from_str(&stdout[start..]).context("Malformed slither JSON report")?;
    if !output.success {
        bail!(
            "slither failed: {}",
            output.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    Ok(output
        .results
        .detectors
        .into_iter()
        .map(|d| {
            let first_line = d.description.lines().next().unwrap_or("").trim().to_string();
            let summary = if first_line.is_empty() {
                d.check
            } else {
                format!("{}: {}", d.check, first_line)
            };
            AuditFinding::new(Severity::parse(&d.impact), summary)
        })
        .collect())
}

#[async_trait]
impl Auditor for Slither {
    async fn audit(&self, project_dir: &Path, _source: &str) -> Result<Vec<AuditFinding>> {
        debug!(program = %self.program, project = %project_dir.display(), "Running slither");
        // exits non-zero whenever it has findings; the JSON decides
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args([".", "--json", "-"])
            .current_dir(project_dir)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.program))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_report(&stdout).with_context(|| {
            format!(
                "slither exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
        })
    }

    async fn version(&self) -> Option<String> {
        let out = Command::new(&self.program)
            .args(&self.base_args)
            .arg("--version")
            .output()
            .await
            .ok()?;
        Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_findings() {
        let json = r#"{"success": true, "error": null, "results": {"detectors": [
            {"check": "reentrancy-eth", "impact": "High", "confidence": "Medium",
             "description": "Reentrancy in Vault.withdraw() (src/Vault.sol#10-20):\n\tExternal calls..."},
            {"check": "solc-version", "impact": "Informational", "description": ""}
        ]}}"#;
        let findings = parse_report(json).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(
            findings[0].summary,
            "reentrancy-eth: Reentrancy in Vault.withdraw() (src/Vault.sol#10-20):"
        );
        assert_eq!(findings[1].summary, "solc-version");
    }

    #[test]
    fn test_clean_report() {
        let findings = parse_report(r#"{"success": true, "results": {}}"#).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_tool_failure_is_error() {
        let err = parse_report(r#"{"success": false, "error": "Invalid compilation"}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid compilation"));
        assert!(parse_report("Traceback (most recent call last)").is_err());
    }
}
