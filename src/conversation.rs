//! Conversation Proxy
//!
//! Forwards user questions to the configured AI backend, falling back to the
//! other provider, and keeps a rolling per-user transcript in the
//! chat-history document. Backend failures never reach the caller as errors;
//! they come back as short user-visible strings.

use tracing::{debug, info, warn};

use crate::ai::{AiError, Backends, GenerateRequest, Provider};
use crate::models::{HistoryDocument, HistoryEntry};
use crate::store::{Collection, Documents};

/// Transcript length kept per user
pub const MAX_HISTORY_ENTRIES: usize = 20;

/// Error text shown to the user is cut to this many characters
const ERROR_PREVIEW_CHARS: usize = 100;

pub const AI_DISABLED_MESSAGE: &str = "❌ The AI assistant is currently disabled.";
pub const AI_UNAVAILABLE_MESSAGE: &str =
    "❌ The AI service is not available right now. Please try again later.";

#[derive(Clone)]
pub struct ConversationProxy {
    docs: Documents,
    backends: Backends,
}

impl ConversationProxy {
    pub fn new(docs: Documents, backends: Backends) -> Self {
        Self { docs, backends }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Answer a user's message. Always returns text to show.
    pub async fn respond(&self, user_id: i64, message: &str) -> String {
        let settings = self.docs.settings();
        if !settings.ai_enabled {
            return AI_DISABLED_MESSAGE.to_string();
        }

        let primary = Provider::from_setting(&settings.ai_provider);
        let history = self.history(user_id);
        let request = GenerateRequest {
            system_prompt: &settings.ai_system_prompt,
            history: &history,
            message,
        };

        for backend in self.backends.ordered(primary) {
            if !backend.is_available() {
                continue;
            }
            let provider = backend.provider();

            match backend.generate(&request).await {
                Ok(answer) => {
                    info!(
                        "AI answer for {} via {} ({} chars)",
                        user_id,
                        provider.as_str(),
                        answer.chars().count()
                    );
                    self.record_exchange(user_id, message, &answer);
                    return answer;
                }
                Err(AiError::EmptyResponse) | Err(AiError::NotConfigured(_)) => {
                    debug!("{} gave no answer, trying next backend", provider.as_str());
                }
                Err(e) => {
                    warn!("{} request failed for {}: {}", provider.as_str(), user_id, e);
                    return format!("❌ Error: {}", truncate_chars(&e.to_string(), ERROR_PREVIEW_CHARS));
                }
            }
        }

        warn!("No AI backend answered for {}", user_id);
        AI_UNAVAILABLE_MESSAGE.to_string()
    }

    /// The user's transcript, oldest first
    pub fn history(&self, user_id: i64) -> Vec<HistoryEntry> {
        let doc: HistoryDocument = self.docs.load(Collection::ChatHistory);
        doc.users.get(&user_id.to_string()).cloned().unwrap_or_default()
    }

    /// Append a question/answer pair and trim to the newest entries
    pub fn record_exchange(&self, user_id: i64, message: &str, answer: &str) {
        self.docs.update(Collection::ChatHistory, |doc: &mut HistoryDocument| {
            let entries = doc.users.entry(user_id.to_string()).or_default();
            entries.push(HistoryEntry::user(message));
            entries.push(HistoryEntry::assistant(answer));
            if entries.len() > MAX_HISTORY_ENTRIES {
                let excess = entries.len() - MAX_HISTORY_ENTRIES;
                entries.drain(..excess);
            }
        });
    }

    pub fn clear_history(&self, user_id: i64) {
        self.docs.update(Collection::ChatHistory, |doc: &mut HistoryDocument| {
            doc.users.remove(&user_id.to_string());
        });
    }
}

/// First `max` characters of `s`
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
