//! Google Gemini backend
//!
//! Sends the system instruction and the user message as one concatenated
//! prompt through the `generateContent` REST endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AiBackend, AiError, GenerateRequest, Provider};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Output cap for the start-up probe
const PROBE_MAX_TOKENS: u32 = 10;

#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiBackend {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    /// Point at a different endpoint root (proxies, tests)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Try each candidate model with a tiny request and keep the first that answers
    pub async fn probe(api_key: &str, candidates: &[String]) -> Option<Self> {
        for model in candidates {
            let backend = Self::new(api_key, model);
            match backend.call("test", Some(PROBE_MAX_TOKENS)).await {
                Ok(_) => {
                    info!("Gemini model selected: {}", model);
                    return Some(backend);
                }
                Err(e) => debug!("Gemini model {} unavailable: {}", model, e),
            }
        }
        warn!("No Gemini model answered the probe; Gemini disabled");
        None
    }

    /// Single concatenated prompt
    pub fn build_prompt(system_prompt: &str, message: &str) -> String {
        format!("{}\n\nUser: {}", system_prompt, message)
    }

    async fn call(&self, prompt: &str, max_tokens: Option<u32>) -> Result<String, AiError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt.to_string()) }],
            }],
            generation_config: max_tokens.map(|n| GenerationConfig { max_output_tokens: n }),
        };

        debug!("Calling Gemini API: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let result: GenerateContentResponse = response.json().await?;
        Ok(extract_text(result))
    }
}

fn extract_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl AiBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty() && !self.model.is_empty()
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, AiError> {
        if !self.is_available() {
            return Err(AiError::NotConfigured("gemini"));
        }
        let prompt = Self::build_prompt(request.system_prompt, request.message);
        let text = self.call(&prompt, None).await?;
        if text.trim().is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }
}
