//! Self-healing error handler
//!
//! `classify` turns a raw failure into an [`ErrorRecord`] by walking the
//! ordered rule list; `apply_fix` runs the matched rule's fix strategy and
//! records the exact edits. Classification depends only on
//! `(raw_error, stage, source)`.

use crate::healing::diagnostics::{parse_diagnostics, SolcDiagnostic};
use crate::healing::record::{ErrorKind, ErrorRecord, FixRecord, FixTarget, RuleMatch, SourceEdit};
use crate::healing::rules::{self, HealingRule, LibraryVersions, RuleInput, RuleOutcome};
use crate::healing::source;
use crate::network::Network;
use crate::stage::Stage;
use tracing::{debug, info, warn};

pub struct SelfHealingErrorHandler {
    rules: Vec<HealingRule>,
    versions: LibraryVersions,
}

impl Default for SelfHealingErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfHealingErrorHandler {
    pub fn new() -> Self {
        Self {
            rules: rules::default_rules(),
            versions: LibraryVersions::new(),
        }
    }

    /// Use the installed library majors for version-aware rules.
    pub fn with_library_versions(mut self, versions: LibraryVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn rules(&self) -> &[HealingRule] {
        &self.rules
    }

    /// Classify a stage failure.
    ///
    /// The first rule whose predicate does not return `NoMatch` decides the
    /// kind. A rule that recognises the error but cannot scope a fix yields
    /// `Unknown` so nothing gets mutated on a guess.
    pub fn classify(&self, raw_error: &str, stage: Stage, source: &str) -> ErrorRecord {
        // Only compiler output carries structured diagnostics.
        let diagnostics: Vec<SolcDiagnostic> = if stage == Stage::Compilation {
            parse_diagnostics(raw_error)
        } else {
            Vec::new()
        };
        let input = RuleInput {
            raw: raw_error,
            stage,
            source,
            diagnostics: &diagnostics,
            versions: &self.versions,
        };

        let mut record = None;
        for rule in &self.rules {
            match (rule.predicate)(&input) {
                RuleOutcome::NoMatch => continue,
                RuleOutcome::Matched(matched) => {
                    debug!(
                        rule = rule.name,
                        kind = %rule.kind,
                        symbols = ?matched.symbols(),
                        "Rule matched"
                    );
                    let mut r = ErrorRecord::new(stage, raw_error, rule.kind);
                    r.matched = Some(matched);
                    record = Some(r);
                    break;
                }
                RuleOutcome::Ambiguous(reason) => {
                    warn!(rule = rule.name, %reason, "Fix scope ambiguous, classifying as unknown");
                    record = Some(
                        ErrorRecord::unknown(stage, raw_error)
                            .with_description(format!("{} matched but scope is ambiguous: {reason}", rule.name)),
                    );
                    break;
                }
            }
        }

        let mut record = record.unwrap_or_else(|| ErrorRecord::unknown(stage, raw_error));
        if let Some(text) = rules::guidance_for(raw_error) {
            record.guidance = Some(text.to_string());
        } else if record.kind == ErrorKind::UnsupportedNetwork {
            record.guidance = Some(format!(
                "Choose one of the supported networks: {}.",
                Network::allow_list()
            ));
        }
        record
    }

    /// Apply the fix strategy for a classified record.
    ///
    /// Returns the (possibly unchanged) source and whether a fix was applied.
    /// On success the record gains a [`FixRecord`] and `auto_fix_applied`.
    pub fn apply_fix(&self, record: &mut ErrorRecord, source: &str) -> (String, bool) {
        if record.fatal || !record.kind.has_source_fix() {
            return (source.to_string(), false);
        }
        let Some(matched) = record.matched.clone() else {
            return (source.to_string(), false);
        };
        let Some(fix) = self
            .rules
            .iter()
            .find(|r| r.name == matched.rule)
            .and_then(|r| r.fix)
        else {
            return (source.to_string(), false);
        };

        let edits = fix(&matched, source);
        if edits.is_empty() {
            debug!(rule = %matched.rule, "Fix strategy produced no edits");
            return (source.to_string(), false);
        }
        if let Err(reason) = validate_edits(&edits, source) {
            warn!(rule = %matched.rule, %reason, "Refusing to apply fix");
            return (source.to_string(), false);
        }

        let fixed = source::apply_edits(source, &edits);
        if fixed == source {
            return (fixed, false);
        }

        let fix_record = FixRecord {
            rule: matched.rule.clone(),
            edits,
            before_fingerprint: source::fingerprint(source),
            after_fingerprint: source::fingerprint(&fixed),
        };
        let description = describe(&matched);
        info!(
            rule = %matched.rule,
            lines = ?fix_record.touched_lines(),
            "{}",
            description
        );
        record.auto_fix_applied = true;
        record.fix_description = Some(description);
        record.fix = Some(fix_record);
        (fixed, true)
    }
}

/// Edits must address lines that still hold exactly what the strategy saw
/// and must not overlap each other.
fn validate_edits(edits: &[SourceEdit], source: &str) -> Result<(), String> {
    let lines: Vec<&str> = source.lines().collect();
    for edit in edits {
        if edit.line == 0 || edit.last_line() > lines.len() {
            return Err(format!("edit at line {} is out of range", edit.line));
        }
        let current = &lines[edit.line - 1..edit.line - 1 + edit.removed.len()];
        if current.iter().zip(&edit.removed).any(|(a, b)| *a != b.as_str()) {
            return Err(format!("line {} no longer matches", edit.line));
        }
    }
    for (i, a) in edits.iter().enumerate() {
        if edits[i + 1..].iter().any(|b| source::edits_overlap(a, b)) {
            return Err(format!("edit at line {} overlaps another edit", a.line));
        }
    }
    Ok(())
}

fn describe(matched: &RuleMatch) -> String {
    let parts: Vec<String> = matched
        .targets
        .iter()
        .map(|t| match t {
            FixTarget::Callable {
                name, remove: true, ..
            } => format!("removed obsolete hook `{name}`"),
            FixTarget::Callable { name, drop_bases, .. } if !drop_bases.is_empty() => {
                format!("dropped {} from the override list of `{name}`", drop_bases.join(", "))
            }
            FixTarget::Callable { name, .. } => format!("stripped override specifier from `{name}`"),
            FixTarget::ImportPath { from, to } => format!("rewrote import {from} -> {to}"),
            FixTarget::CounterVariables { names } => {
                format!("inlined Counters as uint256 for {}", names.join(", "))
            }
            FixTarget::Network { name } => format!("network {name}"),
            FixTarget::Library { import_prefix } => format!("library {import_prefix}"),
        })
        .collect();
    parts.join("; ")
}
