//! Gatebot
//!
//! Telegram bot that hands out one-time registration codes to users who
//! have joined the required channels, with an AI assistant on the side.
//!
//! # Features
//!
//! - **Subscription gate**: every user-facing action checks channel membership first
//! - **Verification codes**: 6-digit, single-use, time-limited, redeemable over HTTP
//! - **AI proxy**: Gemini and OpenAI-compatible backends with automatic fallback
//! - **Admin panel**: channels, users, AI settings, stats and broadcast
//! - **Supervisor**: restarts the polling loop with backoff after failures
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► telegram (teloxide) ──► handlers ──► gate ──► MembershipOracle
//!                    │                    │
//!                    │                    ├── codes ──┐
//!                    │                    ├── users ──┼── store (JSON documents)
//!                    │                    └── conversation ──► ai (Gemini/OpenAI)
//!                    │
//!              supervisor (restart loop)        api (axum) ──► codes
//! ```

pub mod ai;
pub mod api;
pub mod codes;
pub mod config;
pub mod conversation;
pub mod gate;
pub mod handlers;
pub mod messenger;
pub mod models;
pub mod store;
pub mod supervisor;
pub mod telegram;
pub mod users;
pub mod views;

pub use ai::{AiBackend, AiError, Backends, Provider};
pub use codes::{CodeError, CodeManager, CodeStats, IssuedCode};
pub use config::{Config, ConfigError};
pub use conversation::ConversationProxy;
pub use gate::{GateResult, MemberStatus, MembershipOracle, SubscriptionGate};
pub use handlers::{BotState, Command};
pub use messenger::{Messenger, MessengerError, Reply};
pub use models::{CodeRecord, RequiredChannel, Settings, UserRecord};
pub use store::{Documents, StoreError};
pub use supervisor::{RestartPolicy, Supervisor, SupervisorExit};
pub use telegram::TelegramPlatform;
pub use users::{Sender, UserDirectory};
