//! OpenAI chat-completions backend
//!
//! Sends a system message followed by the tail of the user's transcript and
//! the new message. Works with any OpenAI-compatible endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AiBackend, AiError, GenerateRequest, Provider};
use crate::models::HistoryEntry;

/// Transcript entries sent as context
pub const CONTEXT_ENTRIES: usize = 10;

const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    /// Backend for the public OpenAI API
    pub fn openai(model: &str, api_key: impl Into<String>) -> Self {
        Self::new("https://api.openai.com/v1", model, Some(api_key.into()))
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// System instruction, last [`CONTEXT_ENTRIES`] transcript entries, new message
    fn build_messages(system_prompt: &str, history: &[HistoryEntry], message: &str) -> Vec<ChatMessage> {
        let tail = &history[history.len().saturating_sub(CONTEXT_ENTRIES)..];

        let mut messages = Vec::with_capacity(tail.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
        messages.extend(tail.iter().map(|entry| ChatMessage {
            role: entry.role.as_str().to_string(),
            content: entry.content.clone(),
        }));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: message.to_string(),
        });
        messages
    }
}

#[async_trait]
impl AiBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, AiError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(AiError::NotConfigured("openai"))?;

        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request.system_prompt, request.history, request.message),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        debug!(
            "Calling OpenAI API: model={}, messages={}",
            self.model,
            chat_request.messages.len()
        );

        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(api_key)
            .json(&chat_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}
