//! Error records and applied-fix bookkeeping

use crate::stage::Stage;
use serde::{Deserialize, Serialize};

/// Closed classification of a stage failure. Drives retry/fix policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// `override` on a function/modifier that no longer overrides anything
    OverrideConflict,
    /// Import of a library module that moved in a newer major version
    ImportPathStale,
    /// Use of a symbol removed in a newer library major version
    DeprecatedSymbol,
    /// Target network outside the allow-list
    UnsupportedNetwork,
    /// Import of a known library that is not installed
    DependencyMissing,
    /// Timeouts, connection resets, rate limits
    Transient,
    /// Nothing matched, or the fix scope was ambiguous
    Unknown,
}

impl ErrorKind {
    /// Fatal kinds terminate the workflow without a retry.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::UnsupportedNetwork)
    }

    /// Kinds that have a source-mutation strategy.
    pub fn has_source_fix(self) -> bool {
        matches!(
            self,
            Self::OverrideConflict | Self::ImportPathStale | Self::DeprecatedSymbol
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverrideConflict => write!(f, "override_conflict"),
            Self::ImportPathStale => write!(f, "import_path_stale"),
            Self::DeprecatedSymbol => write!(f, "deprecated_symbol"),
            Self::UnsupportedNetwork => write!(f, "unsupported_network"),
            Self::DependencyMissing => write!(f, "dependency_missing"),
            Self::Transient => write!(f, "transient"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One location-scoped thing a fix strategy acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum FixTarget {
    /// A function or modifier whose `override` specifier conflicts.
    /// `remove` is set for known-dead hooks that are dropped entirely.
    Callable {
        name: String,
        start_line: usize,
        end_line: usize,
        header_end_line: usize,
        remove: bool,
        /// Bases to drop from `override(...)`; empty strips the specifier
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        drop_bases: Vec<String>,
    },
    /// An import path to rewrite verbatim.
    ImportPath { from: String, to: String },
    /// State variables declared with the removed counter struct.
    CounterVariables { names: Vec<String> },
    /// A disallowed network name.
    Network { name: String },
    /// A known library whose sources could not be found.
    Library { import_prefix: String },
}

/// Structured predicate result: which rule fired and exactly what it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule: String,
    pub targets: Vec<FixTarget>,
    /// Line of the first diagnostic that triggered the rule, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl RuleMatch {
    pub fn new(rule: &str, targets: Vec<FixTarget>) -> Self {
        Self {
            rule: rule.to_string(),
            targets,
            line: None,
        }
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }

    /// Names of the symbols this match targets, for logs and reports.
    pub fn symbols(&self) -> Vec<String> {
        self.targets
            .iter()
            .flat_map(|t| match t {
                FixTarget::Callable { name, .. } => vec![name.clone()],
                FixTarget::ImportPath { from, .. } => vec![from.clone()],
                FixTarget::CounterVariables { names } => names.clone(),
                FixTarget::Network { name } => vec![name.clone()],
                FixTarget::Library { import_prefix } => vec![import_prefix.clone()],
            })
            .collect()
    }
}

/// A contiguous line replacement. `line` is 1-based in the pre-fix source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEdit {
    pub line: usize,
    pub removed: Vec<String>,
    pub inserted: Vec<String>,
}

impl SourceEdit {
    /// Replace a single line.
    pub fn replace(line: usize, before: &str, after: &str) -> Self {
        Self {
            line,
            removed: vec![before.to_string()],
            inserted: vec![after.to_string()],
        }
    }

    /// Delete `lines` starting at `line`.
    pub fn delete(line: usize, lines: Vec<String>) -> Self {
        Self {
            line,
            removed: lines,
            inserted: Vec::new(),
        }
    }

    /// Last pre-fix line touched by this edit.
    pub fn last_line(&self) -> usize {
        self.line + self.removed.len().saturating_sub(1)
    }
}

/// Everything needed to rebuild a before/after diff of an applied fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub rule: String,
    pub edits: Vec<SourceEdit>,
    pub before_fingerprint: String,
    pub after_fingerprint: String,
}

impl FixRecord {
    /// Pre-fix line numbers touched by the fix.
    pub fn touched_lines(&self) -> Vec<usize> {
        self.edits
            .iter()
            .flat_map(|e| e.line..=e.last_line().max(e.line))
            .collect()
    }

    /// Render as a minimal unified diff (one hunk per edit, no context lines).
    pub fn unified_diff(&self, file_label: &str) -> String {
        let mut out = format!("--- a/{file_label}\n+++ b/{file_label}\n");
        let mut offset: isize = 0;
        for edit in &self.edits {
            let new_start = edit.line as isize + offset;
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                edit.line,
                edit.removed.len(),
                new_start.max(0),
                edit.inserted.len()
            ));
            for line in &edit.removed {
                out.push_str(&format!("-{line}\n"));
            }
            for line in &edit.inserted {
                out.push_str(&format!("+{line}\n"));
            }
            offset += edit.inserted.len() as isize - edit.removed.len() as isize;
        }
        out
    }
}

/// Classified failure of one stage attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub raw_message: String,
    pub kind: ErrorKind,
    pub auto_fix_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_description: Option<String>,
    /// Set when the failure must not be retried regardless of kind.
    #[serde(default)]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<RuleMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixRecord>,
    /// Actionable next step for a human, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl ErrorRecord {
    pub fn new(stage: Stage, raw_message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            stage,
            raw_message: raw_message.into(),
            kind,
            auto_fix_applied: false,
            fix_description: None,
            fatal: kind.is_fatal(),
            matched: None,
            fix: None,
            guidance: None,
        }
    }

    pub fn unknown(stage: Stage, raw_message: impl Into<String>) -> Self {
        Self::new(stage, raw_message, ErrorKind::Unknown)
    }

    pub fn transient(stage: Stage, raw_message: impl Into<String>) -> Self {
        Self::new(stage, raw_message, ErrorKind::Transient)
    }

    /// A failure that must terminate the workflow whatever its kind.
    pub fn fatal(stage: Stage, raw_message: impl Into<String>, kind: ErrorKind) -> Self {
        let mut record = Self::new(stage, raw_message, kind);
        record.fatal = true;
        record
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.fix_description = Some(description.into());
        self
    }

    /// Record a remediation that did not mutate source (e.g. installing a library).
    pub fn mark_remediated(&mut self, description: impl Into<String>) {
        self.auto_fix_applied = true;
        self.fix_description = Some(description.into());
    }

    /// First line of the raw message, trimmed, for tables.
    pub fn headline(&self) -> &str {
        self.raw_message
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::UnsupportedNetwork.is_fatal());
        assert!(!ErrorKind::Transient.is_fatal());
        assert!(!ErrorKind::Unknown.is_fatal());
        assert!(ErrorRecord::new(Stage::Deployment, "x", ErrorKind::UnsupportedNetwork).fatal);
    }

    #[test]
    fn test_unified_diff_offsets() {
        let fix = FixRecord {
            rule: "r".into(),
            edits: vec![
                SourceEdit::delete(3, vec!["a".into(), "b".into()]),
                SourceEdit::replace(10, "old", "new"),
            ],
            before_fingerprint: "x".into(),
            after_fingerprint: "y".into(),
        };
        let diff = fix.unified_diff("Token.sol");
        assert!(diff.contains("@@ -3,2 +3,0 @@"));
        assert!(diff.contains("@@ -10,1 +8,1 @@"));
        assert!(diff.contains("-old\n+new\n"));
        assert_eq!(fix.touched_lines(), vec![3, 4, 10]);
    }

    #[test]
    fn test_headline_skips_blank_lines() {
        let record = ErrorRecord::unknown(Stage::Compilation, "\n\n  Error (7792): boom\nmore");
        assert_eq!(record.headline(), "Error (7792): boom");
    }
}
