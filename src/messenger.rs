//! Messenger Trait Definitions
//!
//! Platform-neutral outbound surface used by the handlers. The Telegram
//! adapter implements it; tests substitute a recording implementation.

use async_trait::async_trait;

/// Maximum characters per outbound message chunk
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Error types for messenger operations
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Blocked by user: {0}")]
    Blocked(i64),

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Text format of a reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Html,
    Plain,
}

/// Button for inline keyboards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Callback { text: String, data: String },
    Link { text: String, url: String },
}

impl Button {
    pub fn callback(text: &str, data: &str) -> Self {
        Self::Callback {
            text: text.to_string(),
            data: data.to_string(),
        }
    }

    pub fn link(text: &str, url: &str) -> Self {
        Self::Link {
            text: text.to_string(),
            url: url.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Callback { text, .. } | Self::Link { text, .. } => text,
        }
    }
}

/// Keyboard attached to a reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Keyboard {
    #[default]
    None,
    /// Buttons under the message
    Inline(Vec<Vec<Button>>),
    /// Persistent reply keyboard of plain text buttons
    Menu(Vec<Vec<String>>),
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub format: Format,
    pub keyboard: Keyboard,
}

impl Reply {
    /// HTML reply; callers escape interpolated values
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: Format::Html,
            keyboard: Keyboard::None,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: Format::Plain,
            keyboard: Keyboard::None,
        }
    }

    pub fn with_buttons(mut self, rows: Vec<Vec<Button>>) -> Self {
        self.keyboard = Keyboard::Inline(rows);
        self
    }

    pub fn with_menu(mut self, rows: Vec<Vec<String>>) -> Self {
        self.keyboard = Keyboard::Menu(rows);
        self
    }

    /// All inline buttons, row-major
    pub fn buttons(&self) -> Vec<&Button> {
        match &self.keyboard {
            Keyboard::Inline(rows) => rows.iter().flatten().collect(),
            _ => Vec::new(),
        }
    }
}

/// Metadata for a resolved public chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub chat_id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
}

/// Messenger trait - implemented per platform
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a message, returning its id
    async fn send(&self, chat_id: i64, reply: &Reply) -> Result<i32, MessengerError>;

    /// Replace the text and keyboard of a sent message
    async fn edit(&self, chat_id: i64, message_id: i32, reply: &Reply) -> Result<(), MessengerError>;

    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), MessengerError>;

    /// Answer a button press; `alert` shows a modal instead of a toast
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), MessengerError>;

    /// Look up a public chat by `@handle`
    async fn resolve_chat(&self, handle: &str) -> Result<ChatInfo, MessengerError>;
}

/// Split text into chunks of at most `max` characters, preferring line breaks
///
/// A `max` of zero is treated as one.
pub fn split_message(text: &str, max: usize) -> Vec<&str> {
    let max = max.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let split_at = match remaining.char_indices().nth(max) {
            None => remaining.len(),
            Some((limit, _)) => {
                let window = &remaining[..limit];
                match window.rfind('\n') {
                    Some(nl) if nl >= limit / 2 => nl + 1,
                    _ => limit,
                }
            }
        };
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest;
    }

    chunks
}

/// Escape `<`, `>` and `&` for HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
