//! Request parsing: contract name and generation context from the prompt

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub const MAX_PROMPT_CHARS: usize = 4_000;

static NAMED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:named|called)\s+["'`]?([A-Za-z][A-Za-z0-9_]*)"#).unwrap()
});

/// Keyword → default contract name, first match wins.
const KIND_NAMES: &[(&str, &str)] = &[
    ("erc721", "Collectible"),
    ("nft", "Collectible"),
    ("erc1155", "MultiToken"),
    ("erc20", "Token"),
    ("staking", "Staking"),
    ("vault", "Vault"),
    ("multisig", "MultiSigWallet"),
    ("governor", "Governor"),
    ("dao", "Governor"),
    ("escrow", "Escrow"),
    ("auction", "Auction"),
    ("token", "Token"),
];

const LIBRARY_NOTES: &str = "Library notes: OpenZeppelin Contracts v5 removed Counters (use a plain uint256), \
removed the _beforeTokenTransfer/_afterTokenTransfer hooks (override _update instead), \
and moved ReentrancyGuard and Pausable from security/ to utils/. \
Ownable takes the initial owner as a constructor argument.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Prompt is empty")]
    Empty,

    #[error("Prompt is {len} characters; the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// What generation needs from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    pub prompt: String,
    pub contract_name: String,
    pub context_docs: Vec<String>,
}

pub fn parse_request(prompt: &str) -> Result<ParsedInput, InputError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(InputError::Empty);
    }
    let len = prompt.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(InputError::TooLong {
            len,
            max: MAX_PROMPT_CHARS,
        });
    }

    let contract_name = contract_name_for(prompt);
    let context_docs = vec![
        format!("Name the main contract `{contract_name}` and put it in src/{contract_name}.sol."),
        LIBRARY_NOTES.to_string(),
    ];
    Ok(ParsedInput {
        prompt: prompt.to_string(),
        contract_name,
        context_docs,
    })
}

/// An explicit "named X" wins; otherwise a name by contract kind.
pub fn contract_name_for(prompt: &str) -> String {
    if let Some(caps) = NAMED_PATTERN.captures(prompt) {
        return pascal_case(&caps[1]);
    }
    let lower = prompt.to_ascii_lowercase();
    KIND_NAMES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| "Generated".to_string())
}

fn pascal_case(word: &str) -> String {
    let mut chars = word.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_');
    match chars.next() {
        Some(first) => std::iter::once(first.to_ascii_uppercase()).chain(chars).collect(),
        None => "Generated".to_string(),
    }
}
