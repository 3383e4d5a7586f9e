//! Ordered classification rules
//!
//! Each rule pairs a predicate with an optional fix strategy. Predicates
//! return a [`RuleOutcome`]: a structured match naming the exact symbols and
//! lines to touch, an ambiguity verdict, or no match. The handler walks the
//! list in order and stops at the first rule that does not return `NoMatch`.

use crate::deps::catalog::{self, OPENZEPPELIN, OPENZEPPELIN_UPGRADEABLE};
use crate::healing::diagnostics::SolcDiagnostic;
use crate::healing::record::{ErrorKind, FixTarget, RuleMatch, SourceEdit};
use crate::healing::source::{self, CallableSpan};
use crate::stage::Stage;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static OVERRIDE_CONFLICT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(has override specified but does not override anything|invalid contract specified in override list)")
        .unwrap()
});

static INVALID_OVERRIDE_BASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)invalid contract specified in override list:?\s*"([^"]+)""#).unwrap()
});

static OVERRIDE_LIST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\boverride\s*\(([^)]*)\)").unwrap());

static SOURCE_NOT_FOUND_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Source "([^"]+)" not found"#).unwrap());

static UNDECLARED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(identifier not found or not unique|undeclared identifier)").unwrap()
});

static COUNTERS_IMPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@openzeppelin/contracts(-upgradeable)?/utils/Counters(Upgradeable)?\.sol$").unwrap()
});

static COUNTER_DECL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Counters\.Counter\s+((?:private|internal)\s+)?([A-Za-z_$][\w$]*)\s*;\s*$")
        .unwrap()
});

static USING_COUNTERS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*using\s+Counters\s+for\s+Counters\.Counter\s*;\s*$").unwrap()
});

static COUNTER_CALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_$][\w$]*)\.(current|increment|decrement|reset)\(\)").unwrap()
});

static OVERRIDE_SPECIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+override\b(\s*\([^)]*\))?").unwrap());

static UNSUPPORTED_NETWORK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:unsupported|unknown) (?:network|chain)\W*([\w-]+)"#).unwrap()
});

static UNSUPPORTED_NETWORK_GATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(unsupported (network|chain)|unknown network|chain(?: ?id)? \S+ (is )?not supported)")
        .unwrap()
});

static TRANSIENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(timed? ?out|timeout|connection (refused|reset|closed|aborted)|econnreset|etimedout|broken pipe|rate.?limit|too many requests|\b429\b|\b50[234]\b|bad gateway|service unavailable|temporarily unavailable|network is unreachable)")
        .unwrap()
});

/// Hooks removed in OpenZeppelin 5 whose bodies can never run again; these
/// are dropped entirely instead of having `override` stripped.
pub const DEAD_HOOKS: &[&str] = &[
    "_beforeTokenTransfer",
    "_afterTokenTransfer",
    "_beforeConsecutiveTokenTransfer",
    "_afterConsecutiveTokenTransfer",
];

/// A library module that moved between major versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovedModule {
    pub library: &'static str,
    /// First major version where `to` is the correct path
    pub since_major: u32,
    pub from: &'static str,
    pub to: &'static str,
}

static MOVED_MODULES: &[MovedModule] = &[
    MovedModule {
        library: OPENZEPPELIN,
        since_major: 5,
        from: "@openzeppelin/contracts/security/ReentrancyGuard.sol",
        to: "@openzeppelin/contracts/utils/ReentrancyGuard.sol",
    },
    MovedModule {
        library: OPENZEPPELIN,
        since_major: 5,
        from: "@openzeppelin/contracts/security/Pausable.sol",
        to: "@openzeppelin/contracts/utils/Pausable.sol",
    },
    MovedModule {
        library: OPENZEPPELIN,
        since_major: 5,
        from: "@openzeppelin/contracts/token/ERC20/extensions/draft-ERC20Permit.sol",
        to: "@openzeppelin/contracts/token/ERC20/extensions/ERC20Permit.sol",
    },
    MovedModule {
        library: OPENZEPPELIN,
        since_major: 5,
        from: "@openzeppelin/contracts/token/ERC20/extensions/draft-IERC20Permit.sol",
        to: "@openzeppelin/contracts/token/ERC20/extensions/IERC20Permit.sol",
    },
    MovedModule {
        library: OPENZEPPELIN,
        since_major: 5,
        from: "@openzeppelin/contracts/utils/cryptography/draft-EIP712.sol",
        to: "@openzeppelin/contracts/utils/cryptography/EIP712.sol",
    },
    MovedModule {
        library: OPENZEPPELIN,
        since_major: 5,
        from: "@openzeppelin/contracts/token/ERC721/extensions/draft-ERC721Votes.sol",
        to: "@openzeppelin/contracts/token/ERC721/extensions/ERC721Votes.sol",
    },
    MovedModule {
        library: OPENZEPPELIN_UPGRADEABLE,
        since_major: 5,
        from: "@openzeppelin/contracts-upgradeable/security/ReentrancyGuardUpgradeable.sol",
        to: "@openzeppelin/contracts-upgradeable/utils/ReentrancyGuardUpgradeable.sol",
    },
    MovedModule {
        library: OPENZEPPELIN_UPGRADEABLE,
        since_major: 5,
        from: "@openzeppelin/contracts-upgradeable/security/PausableUpgradeable.sol",
        to: "@openzeppelin/contracts-upgradeable/utils/PausableUpgradeable.sol",
    },
];

/// The moved-module table.
pub fn moved_modules() -> &'static [MovedModule] {
    MOVED_MODULES
}

/// Installed major version per library, used by version-aware rules.
/// Libraries not present default to the catalog's pinned version.
#[derive(Debug, Clone, Default)]
pub struct LibraryVersions {
    majors: HashMap<String, u32>,
}

impl LibraryVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, library: &str, major: u32) {
        self.majors.insert(library.to_string(), major);
    }

    pub fn major(&self, library: &str) -> Option<u32> {
        self.majors.get(library).copied().or_else(|| {
            catalog::library_by_name(library).and_then(|lib| lib.major_version())
        })
    }

    /// Replacement path for `path` under the installed versions, if it moved.
    pub fn moved_target(&self, path: &str) -> Option<&'static str> {
        MOVED_MODULES.iter().find_map(|m| {
            let installed = self.major(m.library)?;
            (m.from == path && installed >= m.since_major).then_some(m.to)
        })
    }
}

/// Everything a predicate may look at.
pub struct RuleInput<'a> {
    pub raw: &'a str,
    pub stage: Stage,
    pub source: &'a str,
    pub diagnostics: &'a [SolcDiagnostic],
    pub versions: &'a LibraryVersions,
}

/// Result of evaluating one predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Matched(RuleMatch),
    /// The rule recognised the error but cannot pin down a safe fix scope.
    Ambiguous(String),
    NoMatch,
}

pub type Predicate = fn(&RuleInput<'_>) -> RuleOutcome;
pub type FixStrategy = fn(&RuleMatch, &str) -> Vec<SourceEdit>;

/// One `(predicate, fix_strategy)` pair.
pub struct HealingRule {
    pub name: &'static str,
    pub kind: ErrorKind,
    pub predicate: Predicate,
    pub fix: Option<FixStrategy>,
}

impl std::fmt::Debug for HealingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("has_fix", &self.fix.is_some())
            .finish()
    }
}

/// Default rules, most specific first.
pub fn default_rules() -> Vec<HealingRule> {
    vec![
        HealingRule {
            name: "override_conflict",
            kind: ErrorKind::OverrideConflict,
            predicate: match_override_conflict,
            fix: Some(fix_override_conflict),
        },
        HealingRule {
            name: "import_path_stale",
            kind: ErrorKind::ImportPathStale,
            predicate: match_stale_import,
            fix: Some(fix_stale_import),
        },
        HealingRule {
            name: "deprecated_counters",
            kind: ErrorKind::DeprecatedSymbol,
            predicate: match_deprecated_counters,
            fix: Some(fix_deprecated_counters),
        },
        HealingRule {
            name: "unsupported_network",
            kind: ErrorKind::UnsupportedNetwork,
            predicate: match_unsupported_network,
            fix: None,
        },
        HealingRule {
            name: "dependency_missing",
            kind: ErrorKind::DependencyMissing,
            predicate: match_dependency_missing,
            fix: None,
        },
        HealingRule {
            name: "transient",
            kind: ErrorKind::Transient,
            predicate: match_transient,
            fix: None,
        },
    ]
}

// ============================================================================
// Rule 1: override conflicts
// ============================================================================

fn match_override_conflict(input: &RuleInput<'_>) -> RuleOutcome {
    if input.stage != Stage::Compilation {
        return RuleOutcome::NoMatch;
    }
    let hits: Vec<&SolcDiagnostic> = input
        .diagnostics
        .iter()
        .filter(|d| !d.is_warning() && OVERRIDE_CONFLICT_PATTERN.is_match(&d.message))
        .collect();
    if hits.is_empty() {
        return RuleOutcome::NoMatch;
    }

    let spans = source::callable_spans(input.source);
    let mut targets: Vec<FixTarget> = Vec::new();

    for diag in &hits {
        let span = match locate_callable(diag, &spans) {
            Ok(span) => span,
            Err(reason) => return RuleOutcome::Ambiguous(reason),
        };
        let base = INVALID_OVERRIDE_BASE_PATTERN
            .captures(&diag.message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let existing = targets.iter_mut().find(|t| {
            matches!(t, FixTarget::Callable { start_line, .. } if *start_line == span.start_line)
        });
        match existing {
            Some(FixTarget::Callable { drop_bases, .. }) => match base {
                Some(base) if !drop_bases.is_empty() => {
                    if !drop_bases.contains(&base) {
                        drop_bases.push(base);
                    }
                }
                // a whole-specifier conflict on the same callable wins
                _ => drop_bases.clear(),
            },
            Some(_) => {}
            None => targets.push(FixTarget::Callable {
                name: span.name.clone(),
                start_line: span.start_line,
                end_line: span.end_line,
                header_end_line: span.header_end_line,
                remove: DEAD_HOOKS.contains(&span.name.as_str()),
                drop_bases: base.into_iter().collect(),
            }),
        }
    }

    RuleOutcome::Matched(
        RuleMatch::new("override_conflict", targets).at_line(hits[0].line),
    )
}

/// Resolve the callable a diagnostic points at. The reported line must fall
/// inside exactly one header; without a line the quoted snippet must name a
/// callable defined exactly once.
fn locate_callable<'a>(
    diag: &SolcDiagnostic,
    spans: &'a [CallableSpan],
) -> Result<&'a CallableSpan, String> {
    if let Some(line) = diag.line {
        let owners: Vec<&CallableSpan> = spans.iter().filter(|s| s.header_contains(line)).collect();
        return match owners.as_slice() {
            [only] => Ok(only),
            [] => Err(format!("line {line} is not inside any function or modifier header")),
            _ => Err(format!("line {line} is inside more than one header")),
        };
    }

    let snippet = diag.snippet_text();
    let named = spans
        .iter()
        .map(|s| s.name.as_str())
        .filter(|name| snippet.contains(&format!("function {name}")) || snippet.contains(&format!("modifier {name}")))
        .collect::<Vec<_>>();
    let name = match named.as_slice() {
        [only] => *only,
        [] => return Err("diagnostic has no location and names no callable".to_string()),
        _ => return Err("diagnostic snippet names several callables".to_string()),
    };

    let defs: Vec<&CallableSpan> = spans.iter().filter(|s| s.name == name).collect();
    match defs.as_slice() {
        [only] => Ok(only),
        _ => Err(format!("'{name}' is defined {} times; overload is ambiguous", defs.len())),
    }
}

fn fix_override_conflict(matched: &RuleMatch, source: &str) -> Vec<SourceEdit> {
    let lines: Vec<&str> = source.lines().collect();
    let mut edits = Vec::new();

    for target in &matched.targets {
        let FixTarget::Callable {
            start_line,
            end_line,
            header_end_line,
            remove,
            drop_bases,
            ..
        } = target
        else {
            continue;
        };

        if *remove {
            let first = leading_doc_comment_start(&lines, *start_line);
            let removed = lines[first - 1..*end_line]
                .iter()
                .map(|l| l.to_string())
                .collect();
            edits.push(SourceEdit::delete(first, removed));
            continue;
        }

        let header: Vec<&str> = lines[start_line - 1..*header_end_line].to_vec();
        let joined = header.join("\n");
        let stripped = if drop_bases.is_empty() {
            OVERRIDE_SPECIFIER_PATTERN.replace_all(&joined, "").to_string()
        } else {
            narrow_override_list(&joined, drop_bases)
        };
        if stripped == joined {
            continue;
        }
        let inserted: Vec<String> = stripped
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        edits.push(SourceEdit {
            line: *start_line,
            removed: header.iter().map(|l| l.to_string()).collect(),
            inserted,
        });
    }
    edits
}

/// Drop `bases` from the header's `override(...)` list. A list left empty
/// strips the specifier.
fn narrow_override_list(header: &str, bases: &[String]) -> String {
    let Some(caps) = OVERRIDE_LIST_PATTERN.captures(header) else {
        return header.to_string();
    };
    let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else {
        return header.to_string();
    };
    let kept: Vec<&str> = list
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty() && !bases.iter().any(|x| x == b))
        .collect();
    if kept.is_empty() {
        return OVERRIDE_SPECIFIER_PATTERN.replace_all(header, "").to_string();
    }
    format!(
        "{}override({}){}",
        &header[..whole.start()],
        kept.join(", "),
        &header[whole.end()..]
    )
}

/// First line of a NatSpec block directly above `start_line` (1-based), or
/// `start_line` itself when there is none.
fn leading_doc_comment_start(lines: &[&str], start_line: usize) -> usize {
    let mut first = start_line;
    let mut in_block = false;
    while first > 1 {
        let above = lines[first - 2].trim();
        if in_block {
            first -= 1;
            if above.starts_with("/**") {
                in_block = false;
                if first > 1 && !lines[first - 2].trim().starts_with("///") {
                    break;
                }
            }
            continue;
        }
        if above.starts_with("///") {
            first -= 1;
        } else if above.ends_with("*/") {
            first -= 1;
            if !above.starts_with("/**") {
                in_block = true;
            }
        } else {
            break;
        }
    }
    if in_block {
        start_line
    } else {
        first
    }
}

// ============================================================================
// Rule 2: stale import paths
// ============================================================================

fn missing_sources<'a>(input: &'a RuleInput<'_>) -> Vec<(&'a SolcDiagnostic, String)> {
    input
        .diagnostics
        .iter()
        .filter(|d| !d.is_warning())
        .filter_map(|d| {
            SOURCE_NOT_FOUND_PATTERN
                .captures(&d.message)
                .map(|caps| (d, caps[1].to_string()))
        })
        .collect()
}

fn match_stale_import(input: &RuleInput<'_>) -> RuleOutcome {
    if input.stage != Stage::Compilation {
        return RuleOutcome::NoMatch;
    }
    let missing = missing_sources(input);
    let stale: Vec<(&SolcDiagnostic, String, &'static str)> = missing
        .iter()
        .filter_map(|(d, path)| {
            input
                .versions
                .moved_target(path)
                .map(|to| (*d, path.clone(), to))
        })
        .collect();
    if stale.is_empty() {
        return RuleOutcome::NoMatch;
    }

    let imported: Vec<String> = source::imports(input.source)
        .into_iter()
        .map(|(_, p)| p)
        .collect();
    let mut targets = Vec::new();
    for (_, from, to) in &stale {
        if !imported.iter().any(|p| p == from) {
            return RuleOutcome::Ambiguous(format!(
                "'{from}' is not imported by the generated source"
            ));
        }
        let target = FixTarget::ImportPath {
            from: from.clone(),
            to: to.to_string(),
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    RuleOutcome::Matched(RuleMatch::new("import_path_stale", targets).at_line(stale[0].0.line))
}

fn fix_stale_import(matched: &RuleMatch, source: &str) -> Vec<SourceEdit> {
    let lines: Vec<&str> = source.lines().collect();
    let mut edits = Vec::new();
    for (line_no, path) in source::imports(source) {
        for target in &matched.targets {
            let FixTarget::ImportPath { from, to } = target else {
                continue;
            };
            if &path == from {
                let before = lines[line_no - 1];
                let after = before.replacen(from.as_str(), to, 1);
                edits.push(SourceEdit::replace(line_no, before, &after));
            }
        }
    }
    edits
}

// ============================================================================
// Rule 3: removed Counters utility
// ============================================================================

fn match_deprecated_counters(input: &RuleInput<'_>) -> RuleOutcome {
    if input.stage != Stage::Compilation {
        return RuleOutcome::NoMatch;
    }
    let errors: Vec<&SolcDiagnostic> = input.diagnostics.iter().filter(|d| !d.is_warning()).collect();

    let import_missing = missing_sources(input)
        .iter()
        .any(|(_, path)| COUNTERS_IMPORT_PATTERN.is_match(path));
    let undeclared = errors.iter().any(|d| {
        UNDECLARED_PATTERN.is_match(&d.message)
            && (d.snippet_text().contains("Counters")
                || d.line
                    .and_then(|l| input.source.lines().nth(l.saturating_sub(1)))
                    .is_some_and(|l| l.contains("Counters")))
    });
    if !import_missing && !undeclared {
        return RuleOutcome::NoMatch;
    }

    let masked = source::mask_non_code(input.source);
    let mut names = Vec::new();
    for (idx, line) in input.source.lines().enumerate() {
        if !masked[idx].contains("Counters") {
            continue;
        }
        if USING_COUNTERS_PATTERN.is_match(line) || masked[idx].trim_start().starts_with("import") {
            continue;
        }
        match COUNTER_DECL_PATTERN.captures(line) {
            Some(caps) => names.push(caps[2].to_string()),
            None => {
                return RuleOutcome::Ambiguous(format!(
                    "line {} uses Counters outside a private/internal state variable",
                    idx + 1
                ))
            }
        }
    }
    if names.is_empty() {
        return RuleOutcome::Ambiguous("no Counters.Counter declarations to inline".to_string());
    }

    let line = errors.first().and_then(|d| d.line);
    RuleOutcome::Matched(
        RuleMatch::new("deprecated_counters", vec![FixTarget::CounterVariables { names }])
            .at_line(line),
    )
}

fn fix_deprecated_counters(matched: &RuleMatch, source: &str) -> Vec<SourceEdit> {
    let names: Vec<&String> = matched
        .targets
        .iter()
        .flat_map(|t| match t {
            FixTarget::CounterVariables { names } => names.iter().collect(),
            _ => Vec::new(),
        })
        .collect();
    if names.is_empty() {
        return Vec::new();
    }

    let imports: HashMap<usize, String> = source::imports(source).into_iter().collect();
    let mut edits = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        if imports
            .get(&line_no)
            .is_some_and(|p| COUNTERS_IMPORT_PATTERN.is_match(p))
            || USING_COUNTERS_PATTERN.is_match(line)
        {
            edits.push(SourceEdit::delete(line_no, vec![line.to_string()]));
            continue;
        }

        let declared = if COUNTER_DECL_PATTERN.is_match(line) {
            line.replacen("Counters.Counter", "uint256", 1)
        } else {
            line.to_string()
        };
        let updated = COUNTER_CALL_PATTERN
            .replace_all(&declared, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                if !names.iter().any(|n| n.as_str() == name) {
                    return caps[0].to_string();
                }
                match &caps[2] {
                    "current" => name.to_string(),
                    "increment" => format!("{name} += 1"),
                    "decrement" => format!("{name} -= 1"),
                    _ => format!("{name} = 0"),
                }
            })
            .to_string();
        if updated != line {
            edits.push(SourceEdit::replace(line_no, line, &updated));
        }
    }
    edits
}

// ============================================================================
// Rule 4: unsupported network (fatal, no fix)
// ============================================================================

fn match_unsupported_network(input: &RuleInput<'_>) -> RuleOutcome {
    if !UNSUPPORTED_NETWORK_GATE.is_match(input.raw) {
        return RuleOutcome::NoMatch;
    }
    let name = UNSUPPORTED_NETWORK_PATTERN
        .captures(input.raw)
        .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    RuleOutcome::Matched(RuleMatch::new(
        "unsupported_network",
        vec![FixTarget::Network { name }],
    ))
}

// ============================================================================
// Classification-only rules
// ============================================================================

fn match_dependency_missing(input: &RuleInput<'_>) -> RuleOutcome {
    if input.stage != Stage::Compilation {
        return RuleOutcome::NoMatch;
    }
    let mut targets = Vec::new();
    for (_, path) in missing_sources(input) {
        let Some(lib) = catalog::library_for_import(&path) else {
            continue;
        };
        let target = FixTarget::Library {
            import_prefix: lib.import_prefix.to_string(),
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    if targets.is_empty() {
        return RuleOutcome::NoMatch;
    }
    RuleOutcome::Matched(RuleMatch::new("dependency_missing", targets))
}

fn match_transient(input: &RuleInput<'_>) -> RuleOutcome {
    // Structured compiler diagnostics are deterministic, never transient.
    if !input.diagnostics.iter().all(|d| d.is_warning()) {
        return RuleOutcome::NoMatch;
    }
    if TRANSIENT_PATTERN.is_match(input.raw) {
        RuleOutcome::Matched(RuleMatch::new("transient", Vec::new()))
    } else {
        RuleOutcome::NoMatch
    }
}

static GUIDANCE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)insufficient funds").unwrap(),
            "Fund the deployer account on the target network and rerun.",
        ),
        (
            Regex::new(r"(?i)nonce too (low|high)").unwrap(),
            "A pending transaction holds the nonce; wait for it to confirm or reset the account nonce.",
        ),
        (
            Regex::new(r"(?i)execution reverted").unwrap(),
            "The constructor reverted; check constructor arguments and require() conditions.",
        ),
        (
            Regex::new(r"(?i)(invalid api ?key|missing api ?key|etherscan.*key)").unwrap(),
            "Set a valid explorer API key (SOLFORGE_EXPLORER_API_KEY) for source verification.",
        ),
        (
            Regex::new(r"(?i)already verified").unwrap(),
            "The contract is already verified; no action needed.",
        ),
        (
            Regex::new(r"(?i)(private key|no signer|wallet)").unwrap(),
            "Provide a deployer key via SOLFORGE_PRIVATE_KEY or `tools.private_key` in the config file.",
        ),
        (
            Regex::new(r"(?i)stack too deep").unwrap(),
            "Reduce local variables in the reported function or enable via-ir in foundry.toml.",
        ),
    ]
});

/// Human next step for a raw error message, when one is known.
pub fn guidance_for(raw: &str) -> Option<&'static str> {
    GUIDANCE
        .iter()
        .find(|(pattern, _)| pattern.is_match(raw))
        .map(|(_, text)| *text)
}
