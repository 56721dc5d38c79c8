//! Reply composition
//!
//! Every user-visible text and keyboard lives here, so handlers only decide
//! *which* reply to send. Stored and user-supplied values are HTML-escaped.

use crate::ai::Provider;
use crate::codes::CodeStats;
use crate::messenger::{escape_html, Button, Reply};
use crate::models::{RequiredChannel, Settings, UserRecord};

// ============ Menu buttons ============

pub const MENU_GET_CODE: &str = "🔑 Get code";
pub const MENU_AI: &str = "🤖 AI assistant";
pub const MENU_CONTACT: &str = "📞 Contact";
pub const MENU_ADMIN: &str = "⚙️ Admin panel";

pub const ADMIN_DENIED: &str = "❌ You don't have admin rights!";

/// Reply keyboard shown after /start
pub fn main_menu(is_admin: bool) -> Vec<Vec<String>> {
    let mut rows = vec![vec![MENU_GET_CODE.to_string(), MENU_AI.to_string()], vec![MENU_CONTACT.to_string()]];
    if is_admin {
        rows.push(vec![MENU_ADMIN.to_string()]);
    }
    rows
}

// ============ Callback actions ============

/// Inline button identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    CheckSubscription,
    NewCode,
    AdminChannels,
    AdminUsers,
    AdminAi,
    AdminStats,
    AdminBroadcast,
    AdminBack,
    ToggleAi,
    ToggleProvider,
}

impl CallbackAction {
    /// Encode action as callback data string
    pub fn encode(&self) -> &'static str {
        match self {
            Self::CheckSubscription => "check_subscription",
            Self::NewCode => "new_code",
            Self::AdminChannels => "admin_channels",
            Self::AdminUsers => "admin_users",
            Self::AdminAi => "admin_ai",
            Self::AdminStats => "admin_stats",
            Self::AdminBroadcast => "admin_broadcast",
            Self::AdminBack => "admin_back",
            Self::ToggleAi => "toggle_ai",
            Self::ToggleProvider => "toggle_provider",
        }
    }

    /// Decode callback data string to action
    pub fn decode(data: &str) -> Option<Self> {
        match data {
            "check_subscription" => Some(Self::CheckSubscription),
            "new_code" => Some(Self::NewCode),
            "admin_channels" => Some(Self::AdminChannels),
            "admin_users" => Some(Self::AdminUsers),
            "admin_ai" => Some(Self::AdminAi),
            "admin_stats" => Some(Self::AdminStats),
            "admin_broadcast" => Some(Self::AdminBroadcast),
            "admin_back" => Some(Self::AdminBack),
            "toggle_ai" => Some(Self::ToggleAi),
            "toggle_provider" => Some(Self::ToggleProvider),
            _ => None,
        }
    }

    /// Restricted to the admin allow-list
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Self::CheckSubscription | Self::NewCode)
    }

    fn button(&self, text: &str) -> Button {
        Button::callback(text, self.encode())
    }
}

fn back_row() -> Vec<Button> {
    vec![CallbackAction::AdminBack.button("🔙 Back")]
}

// ============ User replies ============

pub fn welcome(settings: &Settings, first_name: &str, is_admin: bool) -> Reply {
    let text = format!(
        "{}\n\n👤 <b>{}</b>, pick one of the buttons to get started.\n\n\
         📝 Commands:\n\
         /start - Start the bot\n\
         /code - Registration code\n\
         /ai &lt;question&gt; - AI assistant\n\
         /help - Help",
        escape_html(&settings.welcome_message),
        escape_html(first_name),
    );
    Reply::html(text).with_menu(main_menu(is_admin))
}

pub fn help() -> Reply {
    Reply::html(
        "📖 <b>Help</b>\n\n\
         🔑 <b>Registration:</b>\n\
         • /code or \"🔑 Get code\" - get a registration code\n\
         • Enter the code on the website\n\n\
         🤖 <b>AI assistant:</b>\n\
         • /ai &lt;question&gt; - ask the AI\n\
         • Or just write a message\n\n\
         📞 <b>Contact:</b>\n\
         • \"📞 Contact\" - reach the team\n\n\
         ⚙️ <b>Admins:</b>\n\
         • /admin - admin panel (admins only)",
    )
}

/// Join prompt: one link per missing channel plus a re-check button
pub fn subscription_required(missing: &[RequiredChannel]) -> Reply {
    let mut text = String::from("⚠️ <b>Please join the following channels to use the bot:</b>\n\n");
    let mut rows = Vec::with_capacity(missing.len() + 1);

    for channel in missing {
        let title = channel.display_title();
        text.push_str(&format!("📢 {}\n", escape_html(&title)));
        if let Some(url) = channel.join_url() {
            rows.push(vec![Button::link(&format!("📢 {}", title), &url)]);
        }
    }
    rows.push(vec![CallbackAction::CheckSubscription.button("✅ Check")]);

    Reply::html(text).with_buttons(rows)
}

pub fn subscription_confirmed() -> Reply {
    Reply::html("✅ Great! You have joined all channels.\n\nPress /start to continue.")
}

/// Issued code with its lifetime and a "new code" button
pub fn code_issued(code: &str, ttl_minutes: i64, renewed: bool) -> Reply {
    let heading = if renewed {
        "🔑 <b>Your new registration code:</b>"
    } else {
        "🔑 <b>Your registration code:</b>"
    };
    let text = format!(
        "{}\n\n<code>{}</code>\n\n\
         ⏰ The code is valid for {} minutes.\n\n\
         📋 Enter this code on the website to finish registration.\n\n\
         ⚠️ <b>Important:</b> do not share the code with anyone!",
        heading,
        escape_html(code),
        ttl_minutes,
    );
    Reply::html(text).with_buttons(vec![vec![CallbackAction::NewCode.button("🔄 Get a new code")]])
}

pub fn code_unavailable() -> Reply {
    Reply::plain("❌ Could not issue a code right now. Please try again in a moment.")
}

pub fn ai_usage() -> Reply {
    Reply::html(
        "🤖 <b>AI assistant</b>\n\n\
         Send me a question:\n\
         /ai Your question\n\n\
         Or just write a message!",
    )
}

pub fn ai_intro() -> Reply {
    Reply::html(
        "🤖 <b>AI assistant</b>\n\n\
         Send me a question and I will answer!\n\n\
         Example: give me tips for IELTS Writing Task 2",
    )
}

pub fn thinking() -> Reply {
    Reply::plain("🤔 Thinking...")
}

/// Plain-text AI answer, split by the caller
pub fn ai_answer(answer: &str) -> String {
    format!("🤖 AI answer:\n\n{}", answer)
}

pub fn contact() -> Reply {
    Reply::html(
        "📞 <b>Contact</b>\n\n\
         📱 Admin: @admin\n\
         📧 Email: info@example.com\n\n\
         Write to us if you have questions!",
    )
}

pub fn hint() -> Reply {
    Reply::plain("Please pick one of the buttons or use /help.")
}

// ============ Admin replies ============

/// Numbers shown on the admin panel
#[derive(Debug, Clone, Default)]
pub struct AdminOverview {
    pub users: usize,
    pub active_codes: usize,
    pub channels: usize,
    pub ai_enabled: bool,
    pub provider: String,
}

fn ai_status(enabled: bool) -> &'static str {
    if enabled {
        "✅ Enabled"
    } else {
        "❌ Disabled"
    }
}

fn check_mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

pub fn admin_panel(overview: &AdminOverview) -> Reply {
    let text = format!(
        "⚙️ <b>Admin panel</b>\n\n\
         📊 <b>Statistics:</b>\n\
         • Users: {}\n\
         • Active codes: {}\n\
         • Required channels: {}\n\n\
         🤖 <b>AI:</b>\n\
         • Status: {}\n\
         • Provider: {}",
        overview.users,
        overview.active_codes,
        overview.channels,
        ai_status(overview.ai_enabled),
        escape_html(&overview.provider.to_uppercase()),
    );

    Reply::html(text).with_buttons(vec![
        vec![
            CallbackAction::AdminChannels.button("📢 Channels"),
            CallbackAction::AdminUsers.button("👥 Users"),
        ],
        vec![
            CallbackAction::AdminAi.button("🤖 AI settings"),
            CallbackAction::AdminStats.button("📊 Statistics"),
        ],
        vec![CallbackAction::AdminBroadcast.button("📢 Broadcast")],
    ])
}

fn channel_lines(channels: &[RequiredChannel]) -> String {
    channels
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            let handle = ch.username.as_deref().unwrap_or("—");
            format!("{}. {} (@{})\n", i + 1, escape_html(&ch.display_title()), escape_html(handle))
        })
        .collect()
}

/// `/channels` output
pub fn channel_list(channels: &[RequiredChannel]) -> Reply {
    if channels.is_empty() {
        return Reply::plain("📢 No required channels.");
    }
    Reply::html(format!("📢 <b>Required channels:</b>\n\n{}", channel_lines(channels)))
}

/// Channels sub-panel with management instructions
pub fn channels_panel(channels: &[RequiredChannel]) -> Reply {
    let listing = if channels.is_empty() {
        "No channels configured.\n".to_string()
    } else {
        channel_lines(channels)
    };
    let text = format!(
        "📢 <b>Required channels:</b>\n\n{}\n\
         📝 Commands:\n\
         /addchannel @username Title - add a channel\n\
         /removechannel @username - remove a channel",
        listing
    );
    Reply::html(text).with_buttons(vec![back_row()])
}

pub fn users_panel(total: usize, recent: &[UserRecord]) -> Reply {
    let mut text = format!("👥 <b>Users:</b> {}\n\n", total);
    for user in recent {
        let handle = user
            .username
            .as_deref()
            .map(|u| format!("@{}", escape_html(u)))
            .unwrap_or_else(|| "—".to_string());
        let verified = if user.verified { " ✅" } else { "" };
        text.push_str(&format!("• {} ({}){}\n", escape_html(&user.first_name), handle, verified));
    }
    Reply::html(text).with_buttons(vec![back_row()])
}

pub fn ai_panel(settings: &Settings, gemini_available: bool, openai_available: bool) -> Reply {
    let provider = Provider::from_setting(&settings.ai_provider);
    let text = format!(
        "🤖 <b>AI settings</b>\n\n\
         • Status: {}\n\
         • Provider: {}\n\
         • Gemini: {}\n\
         • OpenAI: {}",
        ai_status(settings.ai_enabled),
        provider.as_str().to_uppercase(),
        check_mark(gemini_available),
        check_mark(openai_available),
    );

    let toggle = if settings.ai_enabled { "❌ Disable" } else { "✅ Enable" };
    let switch = format!("🔁 Switch to {}", provider.other().as_str().to_uppercase());

    Reply::html(text).with_buttons(vec![
        vec![CallbackAction::ToggleAi.button(toggle)],
        vec![CallbackAction::ToggleProvider.button(&switch)],
        back_row(),
    ])
}

pub fn stats_panel(users: usize, codes: &CodeStats) -> Reply {
    let text = format!(
        "📊 <b>Statistics</b>\n\n\
         👥 Users: {}\n\
         🔑 Total codes: {}\n\
         ✅ Used: {}\n\
         ⏳ Active: {}",
        users, codes.total, codes.used, codes.active
    );
    Reply::html(text).with_buttons(vec![back_row()])
}

pub fn broadcast_panel() -> Reply {
    Reply::html(
        "📢 <b>Broadcast</b>\n\n\
         Send a message to every user with:\n\
         /broadcast Your message",
    )
    .with_buttons(vec![back_row()])
}

pub fn broadcast_usage() -> Reply {
    Reply::plain("❌ Format: /broadcast Message text")
}

/// What each recipient receives
pub fn broadcast_message(text: &str) -> Reply {
    Reply::html(format!("📢 <b>Message from the admin:</b>\n\n{}", escape_html(text)))
}

pub fn broadcast_report(sent: usize, failed: usize) -> Reply {
    Reply::plain(format!("✅ Broadcast finished!\n\n✅ Sent: {}\n❌ Failed: {}", sent, failed))
}

pub fn add_channel_usage() -> Reply {
    Reply::plain("❌ Format: /addchannel @username Channel title\n\nExample: /addchannel @myChannel My Channel")
}

pub fn remove_channel_usage() -> Reply {
    Reply::plain("❌ Format: /removechannel @username")
}

pub fn channel_added(channel: &RequiredChannel) -> Reply {
    let handle = channel.username.as_deref().unwrap_or("—");
    Reply::plain(format!("✅ Channel added!\n\n📢 {}\n🔗 @{}", channel.display_title(), handle))
}

pub fn channel_exists() -> Reply {
    Reply::plain("⚠️ This channel is already on the list!")
}

pub fn channel_removed(handle: &str) -> Reply {
    Reply::plain(format!("✅ Channel @{} removed!", handle))
}

pub fn channel_not_found() -> Reply {
    Reply::plain("⚠️ Channel not found!")
}

pub fn channel_lookup_failed(error: &str) -> Reply {
    Reply::plain(format!("❌ Error: {}", error))
}
