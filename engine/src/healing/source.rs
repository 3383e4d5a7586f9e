//! Lightweight Solidity source scanning
//!
//! Just enough structure for scoped fixes: callable spans (functions and
//! modifiers) found by brace matching on a comment/string-masked copy of the
//! source, import statements, and line-edit application.

use crate::healing::record::SourceEdit;
use regex::Regex;
use std::sync::LazyLock;

static CALLABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(function|modifier)\s+([A-Za-z_$][\w$]*)\s*\(").unwrap());

static IMPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import\s+(?:[^;]*?\s+from\s+)?["']([^"']+)["']"#).unwrap()
});

/// A function or modifier located in the source. Lines are 1-based, inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableSpan {
    pub kind: CallableKind,
    pub name: String,
    pub start_line: usize,
    /// Line holding the body's opening brace (or the terminating `;`).
    pub header_end_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    Modifier,
}

impl CallableSpan {
    pub fn header_contains(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.header_end_line
    }

    pub fn contains(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// Short content hash used to tie attempts and fixes to an exact source.
pub fn fingerprint(source: &str) -> String {
    let hash = blake3::hash(source.as_bytes());
    hash.to_hex()[..16].to_string()
}

/// Copy of the source with comments and string literal contents replaced by
/// spaces. Line structure and column positions are preserved.
pub fn mask_non_code(source: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        LineComment,
        BlockComment,
        Str(char),
    }

    let mut mode = Mode::Code;
    let mut lines = Vec::new();
    for line in source.lines() {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            match mode {
                Mode::Code => {
                    if c == '/' && next == Some('/') {
                        mode = Mode::LineComment;
                        out.push_str("  ");
                        i += 2;
                        continue;
                    }
                    if c == '/' && next == Some('*') {
                        mode = Mode::BlockComment;
                        out.push_str("  ");
                        i += 2;
                        continue;
                    }
                    if c == '"' || c == '\'' {
                        mode = Mode::Str(c);
                    }
                    out.push(c);
                }
                Mode::LineComment => out.push(' '),
                Mode::BlockComment => {
                    if c == '*' && next == Some('/') {
                        mode = Mode::Code;
                        out.push_str("  ");
                        i += 2;
                        continue;
                    }
                    out.push(' ');
                }
                Mode::Str(quote) => {
                    if c == '\\' {
                        out.push_str("  ");
                        i += 2;
                        continue;
                    }
                    if c == quote {
                        mode = Mode::Code;
                        out.push(c);
                    } else {
                        out.push(' ');
                    }
                }
            }
            i += 1;
        }
        if mode == Mode::LineComment {
            mode = Mode::Code;
        }
        lines.push(out);
    }
    lines
}

/// Locate every function and modifier definition.
pub fn callable_spans(source: &str) -> Vec<CallableSpan> {
    let masked = mask_non_code(source);
    let mut spans = Vec::new();

    for (idx, line) in masked.iter().enumerate() {
        let Some(caps) = CALLABLE_PATTERN.captures(line) else {
            continue;
        };
        let kind = if &caps[1] == "modifier" {
            CallableKind::Modifier
        } else {
            CallableKind::Function
        };
        let name = caps[2].to_string();
        if let Some((header_end, end)) = scan_body(&masked, idx) {
            spans.push(CallableSpan {
                kind,
                name,
                start_line: idx + 1,
                header_end_line: header_end + 1,
                end_line: end + 1,
            });
        }
    }
    spans
}

/// From the line holding `function`, find the header terminator and the
/// matching closing brace. Returns 0-based line indexes.
fn scan_body(masked: &[String], start: usize) -> Option<(usize, usize)> {
    let mut paren_depth: i32 = 0;
    let mut brace_depth: i32 = 0;
    let mut header_end: Option<usize> = None;

    for (idx, line) in masked.iter().enumerate().skip(start) {
        for c in line.chars() {
            match (header_end, c) {
                (None, '(') => paren_depth += 1,
                (None, ')') => paren_depth -= 1,
                (None, ';') if paren_depth == 0 => return Some((idx, idx)),
                (None, '{') if paren_depth == 0 => {
                    header_end = Some(idx);
                    brace_depth = 1;
                }
                (Some(_), '{') => brace_depth += 1,
                (Some(header), '}') => {
                    brace_depth -= 1;
                    if brace_depth == 0 {
                        return Some((header, idx));
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Import statements as `(line, path)`, 1-based lines.
pub fn imports(source: &str) -> Vec<(usize, String)> {
    let masked = mask_non_code(source);
    source
        .lines()
        .enumerate()
        .filter(|(idx, _)| masked[*idx].trim_start().starts_with("import"))
        .filter_map(|(idx, line)| {
            IMPORT_PATTERN
                .captures(line)
                .map(|caps| (idx + 1, caps[1].to_string()))
        })
        .collect()
}

/// Apply non-overlapping line edits. Edits are addressed against the
/// original line numbers and may be given in any order.
pub fn apply_edits(source: &str, edits: &[SourceEdit]) -> String {
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let mut ordered: Vec<&SourceEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| b.line.cmp(&a.line));

    for edit in ordered {
        let start = edit.line.saturating_sub(1).min(lines.len());
        let end = (start + edit.removed.len()).min(lines.len());
        lines.splice(start..end, edit.inserted.iter().cloned());
    }

    let mut out = lines.join("\n");
    if source.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Whether two edits touch overlapping pre-fix lines.
pub fn edits_overlap(a: &SourceEdit, b: &SourceEdit) -> bool {
    a.line <= b.last_line() && b.line <= a.last_line()
}
