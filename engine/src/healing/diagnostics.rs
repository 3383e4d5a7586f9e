//! solc / forge diagnostic parsing
//!
//! Splits raw compiler output into individual diagnostics with their
//! location and source snippet so classification rules can act on structure
//! instead of the whole blob.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<label>[A-Z][A-Za-z]*(?:Error|Exception)|Error|Warning)(?:\s*\((?P<code>\d+)\))?:\s*(?P<msg>.*)$")
        .unwrap()
});

static LOCATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-->\s*(?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+)").unwrap());

static SNIPPET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?P<line>\d+)\s*\|\s?(?P<text>.*)$").unwrap());

/// One compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolcDiagnostic {
    /// `TypeError`, `ParserError`, `DeclarationError`, `Error`, `Warning`, ...
    pub label: String,
    /// Numeric solc error code (e.g. "7792")
    pub code: Option<String>,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    /// Source lines quoted in the diagnostic, with their line numbers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippet: Vec<(usize, String)>,
}

impl SolcDiagnostic {
    pub fn is_warning(&self) -> bool {
        self.label == "Warning"
    }

    /// Quoted snippet text joined into one string.
    pub fn snippet_text(&self) -> String {
        self.snippet
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse raw compiler output. Warnings are kept; callers filter as needed.
/// The forge wrapper line (`Error: Compiler run failed:`) is dropped.
pub fn parse_diagnostics(raw: &str) -> Vec<SolcDiagnostic> {
    let mut diagnostics: Vec<SolcDiagnostic> = Vec::new();

    for line in raw.lines() {
        if let Some(caps) = HEADER_PATTERN.captures(line) {
            let message = caps["msg"].trim().to_string();
            if message.eq_ignore_ascii_case("compiler run failed:")
                || message.eq_ignore_ascii_case("compiler run failed")
            {
                continue;
            }
            diagnostics.push(SolcDiagnostic {
                label: caps["label"].to_string(),
                code: caps.name("code").map(|m| m.as_str().to_string()),
                message,
                file: None,
                line: None,
                column: None,
                snippet: Vec::new(),
            });
            continue;
        }

        let Some(current) = diagnostics.last_mut() else {
            continue;
        };

        if let Some(caps) = LOCATION_PATTERN.captures(line) {
            if current.file.is_none() {
                current.file = Some(caps["file"].trim().to_string());
                current.line = caps["line"].parse().ok();
                current.column = caps["col"].parse().ok();
            }
        } else if let Some(caps) = SNIPPET_PATTERN.captures(line) {
            if let Ok(n) = caps["line"].parse::<usize>() {
                current.snippet.push((n, caps["text"].to_string()));
            }
        }
    }

    diagnostics
}

/// Errors only, in output order.
pub fn parse_errors(raw: &str) -> Vec<SolcDiagnostic> {
    parse_diagnostics(raw)
        .into_iter()
        .filter(|d| !d.is_warning())
        .collect()
}
