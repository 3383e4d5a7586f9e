//! Chat-completions contract generator
//!
//! Talks to any OpenAI-compatible `/v1/chat/completions` endpoint and pulls
//! the Solidity out of the reply.

use crate::adapters::Generator;
use crate::config::GeneratorConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:solidity|sol)?[ \t]*\n(.*?)```").unwrap());

const SYSTEM_PROMPT: &str = "You write a single self-contained Solidity ^0.8.20 contract for Foundry. \
Use OpenZeppelin Contracts v5 imports (@openzeppelin/contracts/...). \
Reply with exactly one ```solidity fenced block and nothing else.";

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct ChatGenerator {
    config: GeneratorConfig,
    http: reqwest::Client,
}

impl ChatGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    fn messages(prompt: &str, context_docs: &[String]) -> Vec<ChatMessage> {
        let mut system = SYSTEM_PROMPT.to_string();
        for doc in context_docs {
            system.push_str("\n\n");
            system.push_str(doc);
        }
        vec![
            ChatMessage {
                role: "system".into(),
                content: system,
            },
            ChatMessage {
                role: "user".into(),
                content: prompt.to_string(),
            },
        ]
    }
}

/// The first fenced block, or the whole reply when it already looks like
/// bare Solidity.
pub fn extract_solidity(reply: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK.captures(reply) {
        let body = caps[1].trim();
        return (!body.is_empty()).then(|| format!("{body}\n"));
    }
    let trimmed = reply.trim();
    (trimmed.starts_with("// SPDX") || trimmed.starts_with("pragma")).then(|| format!("{trimmed}\n"))
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, prompt: &str, context_docs: &[String]) -> Result<String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::messages(prompt, context_docs),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut builder = self.http.post(&self.config.url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.context("Generator request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Generator API error ({status}): {body}");
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse generator response")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Generator returned no choices")?;
        debug!(chars = content.len(), "Generator replied");

        extract_solidity(&content).context("Generator reply contained no Solidity source")
    }

    async fn version(&self) -> Option<String> {
        Some(self.config.model.clone())
    }
}

/// Check if the generator endpoint answers at all.
pub async fn check_endpoint(url: &str) -> bool {
    let base = url.trim_end_matches("/chat/completions");
    let models_url = format!("{base}/models");
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced() {
        let reply = "Here you go:\n```solidity\npragma solidity ^0.8.20;\ncontract A {}\n```\nEnjoy.";
        assert_eq!(
            extract_solidity(reply).unwrap(),
            "pragma solidity ^0.8.20;\ncontract A {}\n"
        );
    }

    #[test]
    fn test_extract_bare_and_missing() {
        assert!(extract_solidity("// SPDX-License-Identifier: MIT\ncontract A {}").is_some());
        assert!(extract_solidity("I cannot help with that.").is_none());
        assert!(extract_solidity("```solidity\n```").is_none());
    }

    #[test]
    fn test_context_docs_go_to_system_message() {
        let msgs = ChatGenerator::messages("create ERC20 token", &["Counters was removed in v5.".into()]);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.ends_with("Counters was removed in v5."));
        assert_eq!(msgs[1].content, "create ERC20 token");
    }
}
