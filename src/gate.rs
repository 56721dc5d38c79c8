//! Subscription Gate
//!
//! Checks, on every gated interaction, that the user belongs to each required
//! channel. Membership is looked up fresh each time (no cache). A lookup
//! error for one channel skips that channel rather than locking the user out.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::RequiredChannel;
use crate::store::Documents;

/// Membership lookup errors
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Membership lookup failed: {0}")]
    Lookup(String),
}

/// A user's standing in a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    /// Does this status fail the subscription requirement?
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Left | Self::Kicked)
    }
}

/// Answers "what is this user's status in that chat?"
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn member_status(&self, chat_id: i64, user_id: i64) -> Result<MemberStatus, OracleError>;
}

/// Outcome of a subscription check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateResult {
    /// Required channels the user has not joined, in configured order
    pub missing: Vec<RequiredChannel>,
}

impl GateResult {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Clone)]
pub struct SubscriptionGate {
    docs: Documents,
    oracle: Arc<dyn MembershipOracle>,
}

impl SubscriptionGate {
    pub fn new(docs: Documents, oracle: Arc<dyn MembershipOracle>) -> Self {
        Self { docs, oracle }
    }

    /// Check the user against the current required-channel list
    ///
    /// Lookups run concurrently; `missing` keeps the configured order.
    pub async fn check(&self, user_id: i64) -> GateResult {
        let channels = self.docs.settings().required_channels;
        if channels.is_empty() {
            return GateResult::default();
        }

        let lookups = channels.into_iter().map(|channel| async move {
            let chat_id = channel.chat_id?;
            match self.oracle.member_status(chat_id, user_id).await {
                Ok(status) if status.is_missing() => {
                    debug!("User {} is {:?} in {}", user_id, status, chat_id);
                    Some(channel)
                }
                Ok(_) => None,
                Err(e) => {
                    // Fail open for this channel
                    warn!("Subscription check for {} in {} failed: {}", user_id, chat_id, e);
                    None
                }
            }
        });

        let missing = join_all(lookups).await.into_iter().flatten().collect();
        GateResult { missing }
    }
}
