//! Telegram integration
//!
//! Adapts teloxide to the platform-neutral [`Messenger`] and
//! [`MembershipOracle`] seams and runs the long-polling dispatcher.
//!
//! Uses explicit Dispatcher pattern for reliable message polling.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{
        ChatMemberStatus, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
        MessageId, ParseMode, Recipient, Update, User,
    },
    ApiError, RequestError,
};
use tracing::{debug, error, info, warn};

use crate::gate::{MemberStatus, MembershipOracle, OracleError};
use crate::handlers::{self, BotState, IncomingCallback, IncomingMessage};
use crate::messenger::{Button, ChatInfo, Format, Keyboard, Messenger, MessengerError, Reply};
use crate::users::Sender;

/// teloxide-backed messenger and membership oracle
#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    async fn send_as(&self, chat_id: i64, reply: &Reply, html: bool) -> Result<Message, RequestError> {
        let mut request = self.bot.send_message(ChatId(chat_id), &reply.text);
        if html {
            request = request.parse_mode(ParseMode::Html);
        }
        match &reply.keyboard {
            Keyboard::None => {}
            Keyboard::Inline(rows) => request = request.reply_markup(inline_markup(rows)),
            Keyboard::Menu(rows) => request = request.reply_markup(menu_markup(rows)),
        }
        request.await
    }

    async fn edit_as(&self, chat_id: i64, message_id: i32, reply: &Reply, html: bool) -> Result<(), RequestError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), &reply.text);
        if html {
            request = request.parse_mode(ParseMode::Html);
        }
        // Reply keyboards cannot be attached to an edit
        if let Keyboard::Inline(rows) = &reply.keyboard {
            request = request.reply_markup(inline_markup(rows));
        }
        request.await.map(|_| ())
    }
}

fn map_error(chat_id: i64, e: RequestError) -> MessengerError {
    match e {
        RequestError::Api(ApiError::BotBlocked) | RequestError::Api(ApiError::UserDeactivated) => {
            MessengerError::Blocked(chat_id)
        }
        RequestError::Api(ApiError::ChatNotFound) => MessengerError::ChatNotFound(chat_id.to_string()),
        other => MessengerError::Platform(other.to_string()),
    }
}

#[async_trait]
impl Messenger for TelegramPlatform {
    async fn send(&self, chat_id: i64, reply: &Reply) -> Result<i32, MessengerError> {
        let sent = match reply.format {
            Format::Html => match self.send_as(chat_id, reply, true).await {
                Ok(msg) => Ok(msg),
                Err(e @ RequestError::Api(ApiError::BotBlocked | ApiError::UserDeactivated | ApiError::ChatNotFound)) => {
                    Err(e)
                }
                Err(e) => {
                    // HTML failed (probably malformed), send as plain text
                    debug!("HTML send to {} failed, retrying as plain text: {}", chat_id, e);
                    self.send_as(chat_id, reply, false).await
                }
            },
            Format::Plain => self.send_as(chat_id, reply, false).await,
        };

        sent.map(|msg| msg.id.0).map_err(|e| map_error(chat_id, e))
    }

    async fn edit(&self, chat_id: i64, message_id: i32, reply: &Reply) -> Result<(), MessengerError> {
        let html = reply.format == Format::Html;
        let result = match self.edit_as(chat_id, message_id, reply, html).await {
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) if html => {
                debug!("HTML edit of {} failed, retrying as plain text: {}", message_id, e);
                self.edit_as(chat_id, message_id, reply, false).await
            }
            other => other,
        };

        match result {
            Ok(()) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(map_error(chat_id, e)),
        }
    }

    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), MessengerError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(|e| map_error(chat_id, e))
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), MessengerError> {
        let mut request = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text);
        }
        if alert {
            request = request.show_alert(true);
        }
        request
            .await
            .map(|_| ())
            .map_err(|e| MessengerError::Platform(e.to_string()))
    }

    async fn resolve_chat(&self, handle: &str) -> Result<ChatInfo, MessengerError> {
        let recipient = match handle.parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) if handle.starts_with('@') => Recipient::ChannelUsername(handle.to_string()),
            Err(_) => Recipient::ChannelUsername(format!("@{}", handle)),
        };

        let chat = self
            .bot
            .get_chat(recipient)
            .await
            .map_err(|e| MessengerError::ChatNotFound(format!("{}: {}", handle, e)))?;

        Ok(ChatInfo {
            chat_id: chat.id.0,
            username: chat.username().map(str::to_string),
            title: chat.title().map(str::to_string),
        })
    }
}

#[async_trait]
impl MembershipOracle for TelegramPlatform {
    async fn member_status(&self, chat_id: i64, user_id: i64) -> Result<MemberStatus, OracleError> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(user_id as u64))
            .await
            .map_err(|e| OracleError::Lookup(e.to_string()))?;

        Ok(match member.status() {
            ChatMemberStatus::Owner => MemberStatus::Owner,
            ChatMemberStatus::Administrator => MemberStatus::Administrator,
            ChatMemberStatus::Member => MemberStatus::Member,
            ChatMemberStatus::Restricted => MemberStatus::Restricted,
            ChatMemberStatus::Left => MemberStatus::Left,
            ChatMemberStatus::Banned => MemberStatus::Kicked,
        })
    }
}

fn inline_markup(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        rows.iter()
            .map(|row| row.iter().filter_map(inline_button).collect::<Vec<_>>())
            .filter(|row| !row.is_empty()),
    )
}

fn inline_button(button: &Button) -> Option<InlineKeyboardButton> {
    match button {
        Button::Callback { text, data } => Some(InlineKeyboardButton::callback(text.clone(), data.clone())),
        Button::Link { text, url } => match reqwest::Url::parse(url) {
            Ok(url) => Some(InlineKeyboardButton::url(text.clone(), url)),
            Err(e) => {
                warn!("Skipping button {:?} with invalid url {}: {}", text, url, e);
                None
            }
        },
    }
}

fn menu_markup(rows: &[Vec<String>]) -> KeyboardMarkup {
    KeyboardMarkup::new(
        rows.iter()
            .map(|row| row.iter().map(|text| KeyboardButton::new(text.clone())).collect::<Vec<_>>()),
    )
    .resize_keyboard()
}

fn sender_from(user: &User) -> Sender {
    Sender {
        id: user.id.0 as i64,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

/// Verify the token, clear any webhook and poll until the task is aborted
///
/// No Ctrl-C handler is installed here; the supervisor owns shutdown.
pub async fn run_bot(platform: Arc<TelegramPlatform>, state: Arc<BotState>) -> Result<()> {
    let bot = platform.bot().clone();

    // Verify bot token by calling getMe
    info!("Verifying bot token...");
    match bot.get_me().await {
        Ok(me) => {
            info!(
                "Bot authenticated: @{} (ID: {})",
                me.username.as_deref().unwrap_or("unknown"),
                me.id
            );
        }
        Err(e) => {
            error!("Failed to authenticate bot: {}", e);
            anyhow::bail!("Bot authentication failed: {}", e);
        }
    }

    // Delete any existing webhook to ensure polling works
    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    info!("Starting dispatcher with long polling...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![platform, state])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Error in update handler"))
        .build()
        .dispatch()
        .await;

    warn!("Dispatcher stopped");
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(msg: Message, platform: Arc<TelegramPlatform>, state: Arc<BotState>) -> ResponseResult<()> {
    let (Some(user), Some(text)) = (msg.from.as_ref(), msg.text()) else {
        return Ok(());
    };

    let preview: String = text.chars().take(50).collect();
    debug!("Message from {} in {}: {}", user.id, msg.chat.id, preview);

    let incoming = IncomingMessage {
        chat_id: msg.chat.id.0,
        sender: sender_from(user),
        text: text.to_string(),
    };

    if let Err(e) = handlers::handle_message(platform.as_ref(), &state, incoming).await {
        error!("Failed to handle message from {}: {}", user.id, e);
    }
    Ok(())
}

/// Callback query handler for inline buttons
async fn callback_handler(
    query: CallbackQuery,
    platform: Arc<TelegramPlatform>,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    let sender = sender_from(&query.from);
    let incoming = IncomingCallback {
        id: query.id.to_string(),
        chat_id: query.message.as_ref().map(|m| m.chat().id.0).unwrap_or(sender.id),
        message_id: query.message.as_ref().map(|m| m.id().0),
        data: query.data.clone().unwrap_or_default(),
        sender,
    };

    debug!("Callback query: user={}, data={}", incoming.sender.id, incoming.data);

    if let Err(e) = handlers::handle_callback(platform.as_ref(), &state, incoming).await {
        error!("Failed to handle callback from {}: {}", query.from.id, e);
    }
    Ok(())
}
