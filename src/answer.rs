//! Answer synthesis over assembled context.
//!
//! One pipeline, two callers: the knowledge-base `ask` entry point and the
//! task-placement `advise` entry point differ only in system prompt, model
//! name, and token budget. All failures cross this boundary as descriptive
//! strings; the "nothing found" sentinel is a normal outcome, not an error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;

use crate::config::{ChatConfig, Config};
use crate::embedder::EmbeddingClient;
use crate::error::EngineError;
use crate::retrieve;

pub const NO_CONTEXT_ANSWER: &str =
    "No relevant information found in the knowledge base for this question.";

const ASK_SYSTEM_PROMPT: &str = "You are a project knowledge assistant. Answer the question \
using only the provided project context. Cite the source labels you relied on. If the context \
does not contain the answer, say so plainly.";

const ADVISE_SYSTEM_PROMPT: &str = "You are a task-placement advisor for a software project. \
Given the project context and a task description, recommend where the task belongs: a parent \
work item if one fits, related existing tasks, and a suggested priority. Be brief and concrete.";

/// A chat-completion provider: system and user messages in, text out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String>;
}

/// How to retrieve and prompt for one caller of the pipeline.
pub struct SynthesisProfile<'a> {
    pub model: &'a str,
    pub budget_tokens: usize,
    pub system_prompt: &'a str,
}

impl<'a> SynthesisProfile<'a> {
    pub fn ask(chat: &'a ChatConfig) -> Self {
        Self {
            model: &chat.model,
            budget_tokens: chat.answer_budget_tokens,
            system_prompt: ASK_SYSTEM_PROMPT,
        }
    }

    pub fn advise(chat: &'a ChatConfig) -> Self {
        Self {
            model: chat.advisor_model.as_deref().unwrap_or(&chat.model),
            budget_tokens: chat.advisor_budget_tokens,
            system_prompt: ADVISE_SYSTEM_PROMPT,
        }
    }
}

/// Retrieve context for `query` and synthesize an answer.
///
/// Returns the provider's text verbatim, the sentinel when nothing was
/// retrieved (without calling the provider), or a descriptive error string.
/// This function never panics across the retrieval boundary.
pub async fn synthesize(
    pool: &SqlitePool,
    config: &Config,
    embed_client: Option<&dyn EmbeddingClient>,
    chat_client: &dyn ChatClient,
    profile: &SynthesisProfile<'_>,
    query: &str,
) -> String {
    let context =
        match retrieve::retrieve(pool, config, embed_client, query, profile.budget_tokens).await {
            Ok(context) => context,
            Err(e) => return format!("retrieval failed: {e}"),
        };

    if context.is_empty() {
        return NO_CONTEXT_ANSWER.to_string();
    }

    debug!(
        entries = context.entries,
        truncated = context.truncated,
        model = profile.model,
        "synthesizing answer"
    );

    let user = format!(
        "Project context:\n\n{}\n\nQuestion: {}",
        context.text, query
    );

    match chat_client
        .complete(profile.model, profile.system_prompt, &user)
        .await
    {
        Ok(text) => text,
        Err(e) => EngineError::Provider(e.to_string()).to_string(),
    }
}

// ============ OpenAI-compatible chat provider ============

pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_output_tokens: Option<u32>,
}

impl HttpChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.1,
        });
        if let Some(max_tokens) = self.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("chat API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("chat response missing message content"))?;

        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;

    #[test]
    fn advise_profile_falls_back_to_primary_model() {
        let chat = ChatConfig::default();
        let profile = SynthesisProfile::advise(&chat);
        assert_eq!(profile.model, chat.model);
        assert_eq!(profile.budget_tokens, chat.advisor_budget_tokens);
    }

    #[test]
    fn advise_profile_prefers_advisor_model() {
        let chat = ChatConfig {
            advisor_model: Some("gpt-4o".to_string()),
            ..ChatConfig::default()
        };
        let profile = SynthesisProfile::advise(&chat);
        assert_eq!(profile.model, "gpt-4o");
    }

    #[test]
    fn sentinel_is_distinct_from_provider_error_text() {
        let failure = EngineError::Provider("connection refused".to_string()).to_string();
        assert_ne!(failure, NO_CONTEXT_ANSWER);
        assert!(failure.contains("connection refused"));
    }
}
