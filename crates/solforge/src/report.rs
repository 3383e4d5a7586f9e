//! Human-readable workflow report
//!
//! Rendered from the persisted context, so `show` can print a running,
//! cancelled or finished workflow alike.

use solforge_engine::context::{DiagnosticBundle, WorkflowStatus};
use solforge_engine::{Stage, WorkflowContext};

const DETAIL_WIDTH: usize = 72;

/// One row of the stage status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRow {
    pub stage: Stage,
    /// Latest status, or PENDING when the stage never ran
    pub status: String,
    pub attempts: usize,
    pub detail: String,
}

pub fn stage_rows(ctx: &WorkflowContext) -> Vec<StageRow> {
    Stage::ALL
        .into_iter()
        .map(|stage| {
            let attempts = ctx.results_for(stage).count();
            match ctx.latest(stage) {
                Some(result) => {
                    let detail = result
                        .error
                        .as_ref()
                        .map(|e| format!("[{}] {}", e.kind, e.headline()))
                        .or_else(|| result.output.clone())
                        .unwrap_or_default();
                    StageRow {
                        stage,
                        status: result.status.to_string(),
                        attempts,
                        detail,
                    }
                }
                None => {
                    let status = match &ctx.in_flight {
                        Some(f) if f.stage == stage => "INTERRUPTED",
                        _ => "PENDING",
                    };
                    StageRow {
                        stage,
                        status: status.to_string(),
                        attempts,
                        detail: String::new(),
                    }
                }
            }
        })
        .collect()
}

/// Format a workflow as a CLI summary: status table, fix history, next step.
pub fn format_report(ctx: &WorkflowContext, bundle: Option<&DiagnosticBundle>) -> String {
    let mut lines = Vec::new();

    let status = match ctx.terminal() {
        Some(t) => t.status.to_string(),
        None if ctx.in_flight.is_some() => "INTERRUPTED (resumable)".to_string(),
        None => "IN PROGRESS (resumable)".to_string(),
    };
    lines.push(format!("=== Workflow {} ===", ctx.workflow_id()));
    lines.push(format!("Status: {status}"));
    lines.push(format!("Network: {}", ctx.request.network));
    if let Some(name) = &ctx.metadata.contract_name {
        lines.push(format!("Contract: {name}"));
    }
    lines.push(String::new());

    lines.push(format!("{:<22} {:<12} {:>8}  {}", "STAGE", "STATUS", "ATTEMPTS", "DETAIL"));
    for row in stage_rows(ctx) {
        lines.push(format!(
            "{:<22} {:<12} {:>8}  {}",
            row.stage.as_str(),
            row.status,
            row.attempts,
            truncate(&row.detail, DETAIL_WIDTH)
        ));
    }
    lines.push(String::new());

    let errors: Vec<_> = ctx.errors().collect();
    if !errors.is_empty() {
        lines.push("-- Errors and fixes --".to_string());
        for error in errors {
            lines.push(format!("  {} [{}] {}", error.stage, error.kind, error.headline()));
            if let Some(desc) = &error.fix_description {
                lines.push(format!("    fix: {desc}"));
            }
            if let Some(fix) = &error.fix {
                for diff_line in fix.unified_diff("contract.sol").lines() {
                    lines.push(format!("    {diff_line}"));
                }
            }
        }
        lines.push(String::new());
    }

    if !ctx.dependencies.is_empty() {
        let deps: Vec<String> = ctx.dependencies.iter().map(|d| d.source_ref.clone()).collect();
        lines.push(format!("Dependencies: {}", deps.join(", ")));
    }
    for repair in &ctx.metadata.metadata_repairs {
        lines.push(format!("Repaired: {repair}"));
    }
    for ov in &ctx.metadata.insecure_overrides {
        lines.push(format!(
            "Insecure override at {}: {}",
            ov.at.to_rfc3339(),
            ov.findings.join("; ")
        ));
    }

    let artifacts = &ctx.artifacts;
    if let Some(path) = &artifacts.source_path {
        lines.push(format!("Source: {}", path.display()));
    }
    if let Some(deployment) = &artifacts.deployment {
        lines.push(format!(
            "Deployed: {} on {} (tx {})",
            deployment.address, deployment.network, deployment.tx_hash
        ));
    }
    if let Some(status) = &artifacts.verification_status {
        lines.push(format!("Verification: {status}"));
    }
    if let Some(report) = &artifacts.test_report {
        lines.push(format!("Tests: {} passed, {} failed", report.passed, report.failed));
    }
    if let Some(path) = &artifacts.output_path {
        lines.push(format!("Result: {}", path.display()));
    }

    let suggestion = bundle
        .and_then(|b| b.suggestion.clone())
        .or_else(|| ctx.terminal().and_then(|t| t.suggestion.clone()));
    let failed = ctx
        .terminal()
        .is_some_and(|t| t.status == WorkflowStatus::Failed);
    if let Some(suggestion) = suggestion.filter(|_| failed) {
        lines.push(String::new());
        let stage = ctx
            .terminal()
            .and_then(|t| t.failed_stage)
            .map(|s| format!(" at {s}"))
            .unwrap_or_default();
        lines.push(format!("Failed{stage}. Next step: {suggestion}"));
    }
    if !ctx.is_terminal() {
        lines.push(String::new());
        lines.push(format!("Resume with: solforge resume {}", ctx.workflow_id()));
    }

    lines.join("\n")
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
