//! Persisted data model
//!
//! Four independent JSON documents: users, codes, settings and chat history.
//! Every type is `#[serde(default)]` so a document written by an older build
//! (or edited by hand) still loads, with absent keys taking their defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default welcome text shown by `/start`
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "👋 Welcome to IELTS Pro!\n\n🎓 We help you prepare for the IELTS exam.";

/// Default system prompt for the AI assistant
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a professional IELTS preparation assistant. Help users prepare for the IELTS exam.";

/// Default verification code lifetime in minutes
pub const DEFAULT_CODE_EXPIRY_MINUTES: i64 = 10;

/// A bot user, keyed by stringified Telegram id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub verified: bool,
    pub last_active: DateTime<Utc>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            user_id: 0,
            first_name: String::new(),
            last_name: None,
            username: None,
            verified: false,
            last_active: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Users document: `{"users": {"<id>": UserRecord}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersDocument {
    pub users: BTreeMap<String, UserRecord>,
}

/// A verification code record, keyed by the code string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub user_id: i64,
    #[serde(default)]
    pub telegram_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl CodeRecord {
    /// Has this code passed its expiry instant?
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Unused and not yet expired
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

/// Codes document: `{"codes": {"123456": CodeRecord}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodesDocument {
    pub codes: BTreeMap<String, CodeRecord>,
}

/// A channel users must join before using the bot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredChannel {
    pub chat_id: Option<i64>,
    pub username: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl RequiredChannel {
    /// Title for display, falling back to the handle
    pub fn display_title(&self) -> String {
        match (&self.title, &self.username) {
            (Some(title), _) if !title.is_empty() => title.clone(),
            (_, Some(username)) => format!("@{}", username),
            _ => "Channel".to_string(),
        }
    }

    /// Link users can follow to join
    pub fn join_url(&self) -> Option<String> {
        match (&self.url, &self.username) {
            (Some(url), _) if !url.is_empty() => Some(url.clone()),
            (_, Some(username)) if !username.is_empty() => Some(format!("https://t.me/{}", username)),
            _ => None,
        }
    }
}

/// Process-wide bot settings, edited by admins at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub required_channels: Vec<RequiredChannel>,
    pub welcome_message: String,
    pub code_expiry_minutes: i64,
    pub ai_enabled: bool,
    pub ai_provider: String,
    pub ai_system_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            required_channels: Vec::new(),
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            code_expiry_minutes: DEFAULT_CODE_EXPIRY_MINUTES,
            ai_enabled: true,
            ai_provider: "gemini".to_string(),
            ai_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Settings {
    /// Code TTL; non-positive values fall back to the default
    pub fn code_ttl(&self) -> chrono::Duration {
        let minutes = if self.code_expiry_minutes > 0 {
            self.code_expiry_minutes
        } else {
            DEFAULT_CODE_EXPIRY_MINUTES
        };
        chrono::Duration::minutes(minutes)
    }
}

/// Speaker of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Chat history document: `{"users": {"<id>": [HistoryEntry]}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryDocument {
    pub users: BTreeMap<String, Vec<HistoryEntry>>,
}
