//! Conversation summaries through an OpenAI-compatible chat-completions API.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};
use zapdesk_core::{config::SummarizerConfig, error::ZapdeskError};

const SYSTEM_PROMPT: &str = "You summarize customer support conversations held over WhatsApp. \
Reply with one short paragraph covering what the customer wants, what was answered, \
and anything still pending. Use the language of the conversation.";

/// OpenAI-compatible summarizer.
pub struct Summarizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_messages: i64,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

impl Summarizer {
    /// `None` when disabled in config.
    pub fn from_config(config: &SummarizerConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        if config.api_key.is_empty() {
            warn!("summarizer enabled without an api key");
        }
        Some(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_messages: config.max_messages,
        })
    }

    /// How many of the latest messages go into a summary.
    pub fn max_messages(&self) -> i64 {
        self.max_messages
    }

    /// Summarize `(is_from_me, content)` pairs, oldest first.
    pub async fn summarize(
        &self,
        chat_name: &str,
        messages: &[(bool, String)],
    ) -> Result<String, ZapdeskError> {
        if messages.is_empty() {
            return Ok("No messages in this conversation yet.".to_string());
        }

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: transcript(chat_name, messages),
                },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("summarizer: POST {url} model={}", self.model);
        let start = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ZapdeskError::Upstream(format!("summarizer request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ZapdeskError::Upstream(format!(
                "summarizer returned {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| {
            ZapdeskError::Upstream(format!("summarizer: failed to parse response: {e}"))
        })?;

        let summary = parsed
            .choices
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ZapdeskError::Upstream("summarizer returned no choices".into()))?;

        debug!(
            "summarized {} message(s) in {}ms",
            messages.len(),
            start.elapsed().as_millis()
        );
        Ok(summary)
    }
}

/// Plain-text transcript: one `Agent:` / `Customer:` line per message.
fn transcript(chat_name: &str, messages: &[(bool, String)]) -> String {
    let mut out = format!("Conversation with {chat_name}:\n");
    for (is_from_me, content) in messages {
        let who = if *is_from_me { "Agent" } else { "Customer" };
        out.push_str(who);
        out.push_str(": ");
        out.push_str(content.trim());
        out.push('\n');
    }
    out
}
