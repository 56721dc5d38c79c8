//! Interaction Dispatcher
//!
//! Routes commands, menu buttons, inline button presses and free text to the
//! code manager, subscription gate and conversation proxy. Platform-neutral:
//! all output goes through [`Messenger`].

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ai::{Backends, Provider};
use crate::codes::CodeManager;
use crate::config::Config;
use crate::conversation::{truncate_chars, ConversationProxy};
use crate::gate::{MembershipOracle, SubscriptionGate};
use crate::messenger::{split_message, Messenger, MessengerError, Reply, MAX_MESSAGE_CHARS};
use crate::models::RequiredChannel;
use crate::store::Documents;
use crate::users::{Sender, UserDirectory};
use crate::views::{self, AdminOverview, CallbackAction};

/// Users listed on the admin users panel
const RECENT_USERS_SHOWN: usize = 10;

/// Free text must be longer than this to reach the AI
const MIN_AI_TEXT_CHARS: usize = 2;

/// Shared state for all handlers
#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub docs: Documents,
    pub users: UserDirectory,
    pub codes: CodeManager,
    pub gate: SubscriptionGate,
    pub conversation: ConversationProxy,
}

impl BotState {
    pub fn new(config: Config, docs: Documents, oracle: Arc<dyn MembershipOracle>, backends: Backends) -> Self {
        Self {
            config: Arc::new(config),
            users: UserDirectory::new(docs.clone()),
            codes: CodeManager::new(docs.clone()),
            gate: SubscriptionGate::new(docs.clone(), oracle),
            conversation: ConversationProxy::new(docs.clone(), backends),
            docs,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.config.is_admin(user_id)
    }

    fn overview(&self) -> AdminOverview {
        let settings = self.docs.settings();
        AdminOverview {
            users: self.users.count(),
            active_codes: self.codes.stats().active,
            channels: settings.required_channels.len(),
            ai_enabled: settings.ai_enabled,
            provider: Provider::from_setting(&settings.ai_provider).as_str().to_string(),
        }
    }
}

/// Slash commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Code,
    Ai(String),
    Admin,
    AddChannel(String),
    RemoveChannel(String),
    Channels,
    Broadcast(String),
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] args`; `None` when the text is not a command
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_start();
        let rest = text.strip_prefix('/')?;

        let (head, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        let args = args.to_string();

        Some(match name {
            "start" => Self::Start,
            "help" => Self::Help,
            "code" => Self::Code,
            "ai" => Self::Ai(args),
            "admin" => Self::Admin,
            "addchannel" => Self::AddChannel(args),
            "removechannel" => Self::RemoveChannel(args),
            "channels" => Self::Channels,
            "broadcast" => Self::Broadcast(args),
            other => Self::Unknown(other.to_string()),
        })
    }

    /// Requires the subscription gate to pass
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::Start | Self::Help | Self::Code | Self::Ai(_) | Self::Unknown(_))
    }

    /// Restricted to the admin allow-list
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Admin | Self::AddChannel(_) | Self::RemoveChannel(_) | Self::Channels | Self::Broadcast(_)
        )
    }
}

/// Inbound text message
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub sender: Sender,
    pub text: String,
}

/// Inbound inline button press
#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub id: String,
    pub chat_id: i64,
    pub message_id: Option<i32>,
    pub sender: Sender,
    pub data: String,
}

/// Handle a text message or command
pub async fn handle_message(
    messenger: &dyn Messenger,
    state: &BotState,
    msg: IncomingMessage,
) -> Result<(), MessengerError> {
    state.users.touch(&msg.sender);

    match Command::parse(&msg.text) {
        Some(command) => {
            info!("Command from {}: {:?}", msg.sender.id, command);
            handle_command(messenger, state, &msg, command).await
        }
        None => handle_text(messenger, state, &msg).await,
    }
}

async fn handle_command(
    messenger: &dyn Messenger,
    state: &BotState,
    msg: &IncomingMessage,
    command: Command,
) -> Result<(), MessengerError> {
    let chat_id = msg.chat_id;
    let user_id = msg.sender.id;

    if command.requires_admin() && !state.is_admin(user_id) {
        warn!("Unauthorized admin command from {}: {:?}", user_id, command);
        messenger.send(chat_id, &Reply::plain(views::ADMIN_DENIED)).await?;
        return Ok(());
    }

    if command.is_gated() && !ensure_subscribed(messenger, state, chat_id, user_id).await? {
        return Ok(());
    }

    match command {
        Command::Start => {
            let settings = state.docs.settings();
            let reply = views::welcome(&settings, &msg.sender.first_name, state.is_admin(user_id));
            messenger.send(chat_id, &reply).await?;
        }
        Command::Help => {
            messenger.send(chat_id, &views::help()).await?;
        }
        Command::Code => {
            messenger.send(chat_id, &code_reply(state, &msg.sender, false)).await?;
        }
        Command::Ai(question) => {
            if question.is_empty() {
                messenger.send(chat_id, &views::ai_usage()).await?;
            } else {
                ask_ai(messenger, state, chat_id, user_id, &question).await?;
            }
        }
        Command::Admin => {
            messenger.send(chat_id, &views::admin_panel(&state.overview())).await?;
        }
        Command::AddChannel(args) => {
            let reply = add_channel(messenger, state, &args).await;
            messenger.send(chat_id, &reply).await?;
        }
        Command::RemoveChannel(args) => {
            messenger.send(chat_id, &remove_channel(state, &args)).await?;
        }
        Command::Channels => {
            let settings = state.docs.settings();
            messenger.send(chat_id, &views::channel_list(&settings.required_channels)).await?;
        }
        Command::Broadcast(text) => {
            if text.is_empty() {
                messenger.send(chat_id, &views::broadcast_usage()).await?;
            } else {
                let (sent, failed) = broadcast(messenger, state, &text).await;
                messenger.send(chat_id, &views::broadcast_report(sent, failed)).await?;
            }
        }
        Command::Unknown(name) => {
            debug!("Unknown command /{} from {}", name, user_id);
            messenger.send(chat_id, &views::hint()).await?;
        }
    }

    Ok(())
}

/// Menu buttons and free text
async fn handle_text(messenger: &dyn Messenger, state: &BotState, msg: &IncomingMessage) -> Result<(), MessengerError> {
    let chat_id = msg.chat_id;
    let user_id = msg.sender.id;
    let text = msg.text.trim();

    if !ensure_subscribed(messenger, state, chat_id, user_id).await? {
        return Ok(());
    }

    match text {
        views::MENU_GET_CODE => {
            messenger.send(chat_id, &code_reply(state, &msg.sender, false)).await?;
        }
        views::MENU_AI => {
            messenger.send(chat_id, &views::ai_intro()).await?;
        }
        views::MENU_CONTACT => {
            messenger.send(chat_id, &views::contact()).await?;
        }
        views::MENU_ADMIN => {
            let reply = if state.is_admin(user_id) {
                views::admin_panel(&state.overview())
            } else {
                Reply::plain(views::ADMIN_DENIED)
            };
            messenger.send(chat_id, &reply).await?;
        }
        _ => {
            let ai_enabled = state.docs.settings().ai_enabled;
            if ai_enabled && text.chars().count() > MIN_AI_TEXT_CHARS {
                ask_ai(messenger, state, chat_id, user_id, text).await?;
            } else {
                messenger.send(chat_id, &views::hint()).await?;
            }
        }
    }

    Ok(())
}

/// Handle an inline button press
pub async fn handle_callback(
    messenger: &dyn Messenger,
    state: &BotState,
    cb: IncomingCallback,
) -> Result<(), MessengerError> {
    state.users.touch(&cb.sender);
    let user_id = cb.sender.id;

    let Some(action) = CallbackAction::decode(&cb.data) else {
        debug!("Unknown callback data from {}: {}", user_id, cb.data);
        messenger.answer_callback(&cb.id, None, false).await?;
        return Ok(());
    };

    if action.requires_admin() && !state.is_admin(user_id) {
        warn!("Unauthorized admin action from {}: {:?}", user_id, action);
        messenger.answer_callback(&cb.id, Some(views::ADMIN_DENIED), true).await?;
        return Ok(());
    }

    match action {
        CallbackAction::ToggleAi => {
            let enabled = state.docs.update_settings(|s| {
                s.ai_enabled = !s.ai_enabled;
                s.ai_enabled
            });
            info!("Admin {} set AI enabled={}", user_id, enabled);
            let notice = if enabled { "AI enabled!" } else { "AI disabled!" };
            messenger.answer_callback(&cb.id, Some(notice), false).await?;
        }
        CallbackAction::ToggleProvider => {
            let provider = state.docs.update_settings(|s| {
                let next = Provider::from_setting(&s.ai_provider).other();
                s.ai_provider = next.as_str().to_string();
                next
            });
            info!("Admin {} set AI provider={}", user_id, provider.as_str());
            let notice = format!("Provider: {}", provider.as_str().to_uppercase());
            messenger.answer_callback(&cb.id, Some(notice.as_str()), false).await?;
        }
        _ => messenger.answer_callback(&cb.id, None, false).await?,
    }

    let reply = match action {
        CallbackAction::CheckSubscription => {
            let result = state.gate.check(user_id).await;
            if result.is_satisfied() {
                views::subscription_confirmed()
            } else {
                info!("User {} still missing {} channel(s)", user_id, result.missing.len());
                views::subscription_required(&result.missing)
            }
        }
        CallbackAction::NewCode => {
            let result = state.gate.check(user_id).await;
            if result.is_satisfied() {
                code_reply(state, &cb.sender, true)
            } else {
                info!("Gate denied new code for {}", user_id);
                views::subscription_required(&result.missing)
            }
        }
        CallbackAction::AdminChannels => views::channels_panel(&state.docs.settings().required_channels),
        CallbackAction::AdminUsers => views::users_panel(state.users.count(), &state.users.recent(RECENT_USERS_SHOWN)),
        CallbackAction::AdminAi | CallbackAction::ToggleAi | CallbackAction::ToggleProvider => {
            let backends = state.conversation.backends();
            views::ai_panel(
                &state.docs.settings(),
                backends.is_available(Provider::Gemini),
                backends.is_available(Provider::OpenAi),
            )
        }
        CallbackAction::AdminStats => views::stats_panel(state.users.count(), &state.codes.stats()),
        CallbackAction::AdminBroadcast => views::broadcast_panel(),
        CallbackAction::AdminBack => views::admin_panel(&state.overview()),
    };

    show(messenger, cb.chat_id, cb.message_id, &reply).await
}

/// Edit the originating message, or send a new one when that fails
async fn show(
    messenger: &dyn Messenger,
    chat_id: i64,
    message_id: Option<i32>,
    reply: &Reply,
) -> Result<(), MessengerError> {
    if let Some(message_id) = message_id {
        match messenger.edit(chat_id, message_id, reply).await {
            Ok(()) => return Ok(()),
            Err(e) => debug!("Edit of {} failed, sending instead: {}", message_id, e),
        }
    }
    messenger.send(chat_id, reply).await.map(|_| ())
}

/// Run the gate; on failure send the join prompt and return false
async fn ensure_subscribed(
    messenger: &dyn Messenger,
    state: &BotState,
    chat_id: i64,
    user_id: i64,
) -> Result<bool, MessengerError> {
    let result = state.gate.check(user_id).await;
    if result.is_satisfied() {
        return Ok(true);
    }

    info!("Gate denied {}: missing {} channel(s)", user_id, result.missing.len());
    messenger.send(chat_id, &views::subscription_required(&result.missing)).await?;
    Ok(false)
}

fn code_reply(state: &BotState, sender: &Sender, renewed: bool) -> Reply {
    match state.codes.issue(sender.id, sender.username.as_deref()) {
        Ok(issued) => {
            let ttl = state.docs.settings().code_ttl().num_minutes();
            views::code_issued(&issued.code, ttl, renewed)
        }
        Err(e) => {
            error!("Failed to issue code for {}: {}", sender.id, e);
            views::code_unavailable()
        }
    }
}

/// Placeholder, answer, then remove the placeholder
async fn ask_ai(
    messenger: &dyn Messenger,
    state: &BotState,
    chat_id: i64,
    user_id: i64,
    question: &str,
) -> Result<(), MessengerError> {
    let placeholder = messenger.send(chat_id, &views::thinking()).await?;
    let answer = state.conversation.respond(user_id, question).await;

    if let Err(e) = messenger.delete(chat_id, placeholder).await {
        debug!("Failed to delete placeholder {}: {}", placeholder, e);
    }

    let text = views::ai_answer(&answer);
    for chunk in split_message(&text, MAX_MESSAGE_CHARS) {
        messenger.send(chat_id, &Reply::plain(chunk)).await?;
    }
    Ok(())
}

/// `/addchannel @handle Title...`
async fn add_channel(messenger: &dyn Messenger, state: &BotState, args: &str) -> Reply {
    let mut parts = args.split_whitespace();
    let Some(handle) = parts.next() else {
        return views::add_channel_usage();
    };
    let title = parts.collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return views::add_channel_usage();
    }

    let info = match messenger.resolve_chat(handle).await {
        Ok(info) => info,
        Err(e) => {
            warn!("Failed to resolve channel {}: {}", handle, e);
            return views::channel_lookup_failed(truncate_chars(&e.to_string(), 100));
        }
    };

    let channel = RequiredChannel {
        chat_id: Some(info.chat_id),
        url: info.username.as_ref().map(|u| format!("https://t.me/{}", u)),
        username: info.username.clone(),
        title: Some(title),
    };

    let added = state.docs.update_settings(|s| {
        if s.required_channels.iter().any(|ch| ch.chat_id == Some(info.chat_id)) {
            false
        } else {
            s.required_channels.push(channel.clone());
            true
        }
    });

    if added {
        info!("Required channel added: {} ({})", handle, info.chat_id);
        views::channel_added(&channel)
    } else {
        views::channel_exists()
    }
}

/// `/removechannel @handle`
fn remove_channel(state: &BotState, args: &str) -> Reply {
    let handle = args.split_whitespace().next().unwrap_or("").trim_start_matches('@');
    if handle.is_empty() {
        return views::remove_channel_usage();
    }

    let removed = state.docs.update_settings(|s| {
        let before = s.required_channels.len();
        s.required_channels.retain(|ch| ch.username.as_deref() != Some(handle));
        before - s.required_channels.len()
    });

    if removed == 0 {
        return views::channel_not_found();
    }
    info!("Required channel removed: @{}", handle);
    views::channel_removed(handle)
}

/// Send to every known user, pausing between sends. Returns (sent, failed).
pub async fn broadcast(messenger: &dyn Messenger, state: &BotState, text: &str) -> (usize, usize) {
    let reply = views::broadcast_message(text);
    let recipients = state.users.ids();
    let delay = state.config.broadcast_delay;
    let (mut sent, mut failed) = (0, 0);

    info!("Broadcasting to {} users", recipients.len());

    for user_id in recipients {
        match messenger.send(user_id, &reply).await {
            Ok(_) => sent += 1,
            Err(e) => {
                debug!("Broadcast to {} failed: {}", user_id, e);
                failed += 1;
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    info!("Broadcast finished: sent={}, failed={}", sent, failed);
    (sent, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiBackend, AiError, GenerateRequest};
    use crate::gate::{MemberStatus, OracleError};
    use crate::messenger::{ChatInfo, Keyboard};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

    const ADMIN: i64 = 1;
    const USER: i64 = 7;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Sent(i64, Reply),
        Edited(i64, i32, Reply),
        Deleted(i64, i32),
        Answered(Option<String>, bool),
    }

    #[derive(Default)]
    struct RecordingMessenger {
        events: Mutex<Vec<Event>>,
        next_id: AtomicI32,
        blocked: HashSet<i64>,
        chats: HashMap<String, ChatInfo>,
    }

    impl RecordingMessenger {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn sent_texts(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Sent(_, reply) => Some(reply.text),
                    _ => None,
                })
                .collect()
        }

        fn last_sent(&self) -> Reply {
            self.events()
                .into_iter()
                .rev()
                .find_map(|e| match e {
                    Event::Sent(_, reply) => Some(reply),
                    _ => None,
                })
                .unwrap()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send(&self, chat_id: i64, reply: &Reply) -> Result<i32, MessengerError> {
            if self.blocked.contains(&chat_id) {
                return Err(MessengerError::Blocked(chat_id));
            }
            self.events.lock().push(Event::Sent(chat_id, reply.clone()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 100)
        }

        async fn edit(&self, chat_id: i64, message_id: i32, reply: &Reply) -> Result<(), MessengerError> {
            self.events.lock().push(Event::Edited(chat_id, message_id, reply.clone()));
            Ok(())
        }

        async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), MessengerError> {
            self.events.lock().push(Event::Deleted(chat_id, message_id));
            Ok(())
        }

        async fn answer_callback(&self, _id: &str, text: Option<&str>, alert: bool) -> Result<(), MessengerError> {
            self.events.lock().push(Event::Answered(text.map(str::to_string), alert));
            Ok(())
        }

        async fn resolve_chat(&self, handle: &str) -> Result<ChatInfo, MessengerError> {
            self.chats
                .get(handle)
                .cloned()
                .ok_or_else(|| MessengerError::ChatNotFound(handle.to_string()))
        }
    }

    #[derive(Default)]
    struct FixedOracle {
        statuses: Mutex<HashMap<i64, MemberStatus>>,
    }

    #[async_trait]
    impl MembershipOracle for FixedOracle {
        async fn member_status(&self, chat_id: i64, _user_id: i64) -> Result<MemberStatus, OracleError> {
            Ok(self.statuses.lock().get(&chat_id).copied().unwrap_or(MemberStatus::Member))
        }
    }

    struct EchoBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AiBackend for EchoBackend {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo: {}", request.message))
        }
    }

    struct Harness {
        state: BotState,
        oracle: Arc<FixedOracle>,
        backend: Arc<EchoBackend>,
    }

    fn harness() -> Harness {
        harness_with_delay(0)
    }

    fn harness_with_delay(delay_ms: u64) -> Harness {
        let config = Config::from_lookup(|name| match name {
            "BOT_TOKEN" => Some("123:abc".to_string()),
            "ADMIN_IDS" => Some(ADMIN.to_string()),
            "BROADCAST_DELAY_MS" => Some(delay_ms.to_string()),
            _ => None,
        })
        .unwrap();
        let oracle = Arc::new(FixedOracle::default());
        let backend = Arc::new(EchoBackend { calls: AtomicU32::new(0) });
        let backends = Backends::new().with(backend.clone());
        let state = BotState::new(config, Documents::in_memory(), oracle.clone(), backends);
        Harness { state, oracle, backend }
    }

    fn message(user_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: user_id,
            sender: Sender::new(user_id, "Ann").with_username("ann"),
            text: text.to_string(),
        }
    }

    fn callback(user_id: i64, data: &str) -> IncomingCallback {
        IncomingCallback {
            id: "cb-1".to_string(),
            chat_id: user_id,
            message_id: Some(55),
            sender: Sender::new(user_id, "Ann"),
            data: data.to_string(),
        }
    }

    fn require_channel(h: &Harness, chat_id: i64, status: MemberStatus) {
        h.state.docs.update_settings(|s| {
            s.required_channels.push(RequiredChannel {
                chat_id: Some(chat_id),
                username: Some("ielts_news".to_string()),
                title: Some("IELTS News".to_string()),
                url: None,
            })
        });
        h.oracle.statuses.lock().insert(chat_id, status);
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/code@gate_bot"), Some(Command::Code));
        assert_eq!(Command::parse("/ai  what is band 7? "), Some(Command::Ai("what is band 7?".to_string())));
        assert_eq!(Command::parse("/ai"), Some(Command::Ai(String::new())));
        assert_eq!(
            Command::parse("/addchannel @news IELTS News"),
            Some(Command::AddChannel("@news IELTS News".to_string()))
        );
        assert_eq!(Command::parse("/Start"), Some(Command::Unknown("Start".to_string())));
        assert_eq!(Command::parse("hello"), None);
    }

    #[tokio::test]
    async fn test_start_records_user_and_shows_menu() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        handle_message(&messenger, &h.state, message(USER, "/start")).await.unwrap();

        assert!(h.state.users.get(USER).is_some());
        let reply = messenger.last_sent();
        assert!(matches!(reply.keyboard, Keyboard::Menu(ref rows) if rows.len() == 2));
    }

    #[tokio::test]
    async fn test_gated_command_shows_join_prompt() {
        let h = harness();
        require_channel(&h, -100, MemberStatus::Kicked);
        let messenger = RecordingMessenger::default();

        handle_message(&messenger, &h.state, message(USER, "/code")).await.unwrap();

        let reply = messenger.last_sent();
        assert!(reply.text.contains("IELTS News"));
        assert_eq!(reply.buttons().last().unwrap().text(), "✅ Check");
        assert_eq!(h.state.codes.stats().total, 0);
        // The user is still recorded
        assert!(h.state.users.get(USER).is_some());
    }

    #[tokio::test]
    async fn test_code_command_issues_code() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        handle_message(&messenger, &h.state, message(USER, "/code")).await.unwrap();

        assert_eq!(h.state.codes.stats().active, 1);
        let reply = messenger.last_sent();
        assert!(reply.text.contains("10 minutes"));
        assert_eq!(reply.buttons()[0].text(), "🔄 Get a new code");
    }

    #[tokio::test]
    async fn test_admin_commands_denied_for_users() {
        let h = harness();
        let messenger = RecordingMessenger::default();

        for text in ["/admin", "/addchannel @x X", "/removechannel @x", "/channels", "/broadcast hi"] {
            handle_message(&messenger, &h.state, message(USER, text)).await.unwrap();
        }

        let texts = messenger.sent_texts();
        assert_eq!(texts.len(), 5);
        assert!(texts.iter().all(|t| t == views::ADMIN_DENIED));
    }

    #[tokio::test]
    async fn test_add_and_remove_channel() {
        let h = harness();
        let mut messenger = RecordingMessenger::default();
        messenger.chats.insert(
            "@ielts_news".to_string(),
            ChatInfo {
                chat_id: -100,
                username: Some("ielts_news".to_string()),
                title: Some("Platform title".to_string()),
            },
        );

        handle_message(&messenger, &h.state, message(ADMIN, "/addchannel @ielts_news IELTS News")).await.unwrap();
        handle_message(&messenger, &h.state, message(ADMIN, "/addchannel @ielts_news Again")).await.unwrap();

        let channels = h.state.docs.settings().required_channels;
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].chat_id, Some(-100));
        assert_eq!(channels[0].title.as_deref(), Some("IELTS News"));
        assert_eq!(channels[0].url.as_deref(), Some("https://t.me/ielts_news"));
        assert_eq!(messenger.last_sent(), views::channel_exists());

        handle_message(&messenger, &h.state, message(ADMIN, "/removechannel @missing")).await.unwrap();
        assert_eq!(messenger.last_sent(), views::channel_not_found());

        handle_message(&messenger, &h.state, message(ADMIN, "/removechannel @ielts_news")).await.unwrap();
        assert!(h.state.docs.settings().required_channels.is_empty());
    }

    #[tokio::test]
    async fn test_add_channel_lookup_failure() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        handle_message(&messenger, &h.state, message(ADMIN, "/addchannel @ghost Ghost")).await.unwrap();

        assert!(messenger.last_sent().text.starts_with("❌ Error:"));
        assert!(h.state.docs.settings().required_channels.is_empty());

        handle_message(&messenger, &h.state, message(ADMIN, "/addchannel @ghost")).await.unwrap();
        assert_eq!(messenger.last_sent(), views::add_channel_usage());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_pauses_after_every_send() {
        let h = harness_with_delay(250);
        for id in [10, 11, 12, 13] {
            h.state.users.touch(&Sender::new(id, "u"));
        }
        let messenger = RecordingMessenger {
            blocked: HashSet::from([11]),
            ..Default::default()
        };

        let start = tokio::time::Instant::now();
        let (sent, failed) = broadcast(&messenger, &h.state, "hello").await;

        assert_eq!((sent, failed), (3, 1));
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(4 * 250), "elapsed {:?}", elapsed);
        assert!(elapsed < std::time::Duration::from_millis(5 * 250), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_broadcast_counts_failures() {
        let h = harness();
        for id in [10, 11, 12] {
            h.state.users.touch(&Sender::new(id, "u"));
        }
        let messenger = RecordingMessenger {
            blocked: HashSet::from([11]),
            ..Default::default()
        };

        handle_message(&messenger, &h.state, message(ADMIN, "/broadcast Exam <tomorrow>")).await.unwrap();

        // Admin, 10 and 12 receive it; 11 is blocked
        let delivered: Vec<i64> = messenger
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sent(chat, reply) if reply.text.contains("Exam &lt;tomorrow&gt;") => Some(chat),
                _ => None,
            })
            .collect();
        assert_eq!(delivered.len(), 3);
        assert!(!delivered.contains(&11));
        assert_eq!(messenger.last_sent(), views::broadcast_report(3, 1));
    }

    #[tokio::test]
    async fn test_free_text_goes_to_ai() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        handle_message(&messenger, &h.state, message(USER, "Tips for writing?")).await.unwrap();

        let events = messenger.events();
        assert_eq!(events[0], Event::Sent(USER, views::thinking()));
        assert_eq!(events[1], Event::Deleted(USER, 100));
        assert_eq!(messenger.last_sent().text, "🤖 AI answer:\n\necho: Tips for writing?");
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.state.conversation.history(USER).len(), 2);
    }

    #[tokio::test]
    async fn test_short_or_disabled_text_gets_hint() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        handle_message(&messenger, &h.state, message(USER, "hi")).await.unwrap();
        assert_eq!(messenger.last_sent(), views::hint());

        h.state.docs.update_settings(|s| s.ai_enabled = false);
        handle_message(&messenger, &h.state, message(USER, "a long question")).await.unwrap();
        assert_eq!(messenger.last_sent(), views::hint());
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_menu_buttons() {
        let h = harness();
        let messenger = RecordingMessenger::default();

        handle_message(&messenger, &h.state, message(USER, views::MENU_CONTACT)).await.unwrap();
        assert_eq!(messenger.last_sent(), views::contact());

        handle_message(&messenger, &h.state, message(USER, views::MENU_ADMIN)).await.unwrap();
        assert_eq!(messenger.last_sent().text, views::ADMIN_DENIED);

        handle_message(&messenger, &h.state, message(USER, views::MENU_GET_CODE)).await.unwrap();
        assert_eq!(h.state.codes.stats().total, 1);
    }

    #[tokio::test]
    async fn test_admin_callback_denied_without_side_effect() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        handle_callback(&messenger, &h.state, callback(USER, "toggle_ai")).await.unwrap();

        assert!(h.state.docs.settings().ai_enabled);
        assert_eq!(
            messenger.events(),
            vec![Event::Answered(Some(views::ADMIN_DENIED.to_string()), true)]
        );
    }

    #[tokio::test]
    async fn test_toggle_ai_and_provider() {
        let h = harness();
        let messenger = RecordingMessenger::default();

        handle_callback(&messenger, &h.state, callback(ADMIN, "toggle_ai")).await.unwrap();
        assert!(!h.state.docs.settings().ai_enabled);

        handle_callback(&messenger, &h.state, callback(ADMIN, "toggle_provider")).await.unwrap();
        assert_eq!(h.state.docs.settings().ai_provider, "openai");

        let events = messenger.events();
        assert_eq!(events[0], Event::Answered(Some("AI disabled!".to_string()), false));
        assert!(matches!(&events[1], Event::Edited(_, 55, reply) if reply.text.contains("❌ Disabled")));
        assert_eq!(events[2], Event::Answered(Some("Provider: OPENAI".to_string()), false));
    }

    #[tokio::test]
    async fn test_check_subscription_callback() {
        let h = harness();
        require_channel(&h, -100, MemberStatus::Left);
        let messenger = RecordingMessenger::default();

        handle_callback(&messenger, &h.state, callback(USER, "check_subscription")).await.unwrap();
        assert!(matches!(&messenger.events()[1], Event::Edited(_, _, reply) if reply.text.contains("IELTS News")));

        h.oracle.statuses.lock().insert(-100, MemberStatus::Member);
        handle_callback(&messenger, &h.state, callback(USER, "check_subscription")).await.unwrap();
        assert_eq!(messenger.events()[3], Event::Edited(USER, 55, views::subscription_confirmed()));
    }

    #[tokio::test]
    async fn test_new_code_callback_is_gated() {
        let h = harness();
        require_channel(&h, -100, MemberStatus::Kicked);
        let messenger = RecordingMessenger::default();

        handle_callback(&messenger, &h.state, callback(USER, "new_code")).await.unwrap();
        assert_eq!(h.state.codes.stats().total, 0);

        h.oracle.statuses.lock().insert(-100, MemberStatus::Member);
        handle_callback(&messenger, &h.state, callback(USER, "new_code")).await.unwrap();
        assert_eq!(h.state.codes.stats().total, 1);
    }

    #[tokio::test]
    async fn test_admin_panels() {
        let h = harness();
        let messenger = RecordingMessenger::default();
        h.state.users.touch(&Sender::new(20, "Bob").with_username("bob"));

        handle_callback(&messenger, &h.state, callback(ADMIN, "admin_users")).await.unwrap();
        handle_callback(&messenger, &h.state, callback(ADMIN, "admin_stats")).await.unwrap();
        handle_callback(&messenger, &h.state, callback(ADMIN, "admin_back")).await.unwrap();

        let edits: Vec<String> = messenger
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Edited(_, _, reply) => Some(reply.text),
                _ => None,
            })
            .collect();
        assert_eq!(edits.len(), 3);
        assert!(edits[0].contains("Bob (@bob)"));
        assert!(edits[1].contains("Total codes: 0"));
        assert!(edits[2].contains("Admin panel"));
    }
}
