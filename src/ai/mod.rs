//! AI Backends
//!
//! Two interchangeable completion providers behind one capability:
//! generate text from a system prompt, the user's transcript and a new message.
//! Each provider shapes its own request; see [`gemini`] and [`openai`].

pub mod gemini;
pub mod openai;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::HistoryEntry;

/// Errors from a completion provider
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Backend not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Empty response")]
    EmptyResponse,
}

/// Provider selector stored in settings as `"gemini"` / `"openai"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }

    /// Parse a settings value; unknown values fall back to Gemini
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            _ => Self::Gemini,
        }
    }

    /// The other provider
    pub fn other(&self) -> Self {
        match self {
            Self::Gemini => Self::OpenAi,
            Self::OpenAi => Self::Gemini,
        }
    }
}

/// Input for one completion
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [HistoryEntry],
    pub message: &'a str,
}

/// A completion provider
#[async_trait]
pub trait AiBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Configured and usable right now
    fn is_available(&self) -> bool;

    /// One completion call, no retries
    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, AiError>;
}

/// The configured providers
#[derive(Clone, Default)]
pub struct Backends {
    backends: Vec<Arc<dyn AiBackend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn AiBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn AiBackend>> {
        self.backends.iter().find(|b| b.provider() == provider)
    }

    /// Is this provider present and usable?
    pub fn is_available(&self, provider: Provider) -> bool {
        self.get(provider).is_some_and(|b| b.is_available())
    }

    /// Try order: primary first, then the fallback
    pub fn ordered(&self, primary: Provider) -> Vec<&Arc<dyn AiBackend>> {
        [primary, primary.other()]
            .into_iter()
            .filter_map(|p| self.get(p))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(Provider);

    #[async_trait]
    impl AiBackend for Stub {
        fn provider(&self) -> Provider {
            self.0
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, _request: &GenerateRequest<'_>) -> Result<String, AiError> {
            Ok(self.0.as_str().to_string())
        }
    }

    #[test]
    fn test_provider_from_setting() {
        assert_eq!(Provider::from_setting("openai"), Provider::OpenAi);
        assert_eq!(Provider::from_setting(" OpenAI "), Provider::OpenAi);
        assert_eq!(Provider::from_setting("gemini"), Provider::Gemini);
        assert_eq!(Provider::from_setting("claude"), Provider::Gemini);
    }

    #[test]
    fn test_ordered_puts_primary_first() {
        let backends = Backends::new()
            .with(Arc::new(Stub(Provider::Gemini)))
            .with(Arc::new(Stub(Provider::OpenAi)));

        let order: Vec<Provider> = backends.ordered(Provider::OpenAi).iter().map(|b| b.provider()).collect();
        assert_eq!(order, vec![Provider::OpenAi, Provider::Gemini]);
    }

    #[test]
    fn test_ordered_skips_absent_providers() {
        let backends = Backends::new().with(Arc::new(Stub(Provider::OpenAi)));
        let order: Vec<Provider> = backends.ordered(Provider::Gemini).iter().map(|b| b.provider()).collect();
        assert_eq!(order, vec![Provider::OpenAi]);
        assert!(!backends.is_available(Provider::Gemini));
    }
}
