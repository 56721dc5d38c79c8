//! Verification Codes
//!
//! Short-lived 6-digit codes that link a Telegram account to a web account.
//! A code is redeemable at most once and only until `expires_at`. Expired
//! records are swept at start-up and then on a fixed interval.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::{CodeRecord, CodesDocument};
use crate::store::{Collection, Documents};

/// Draws before giving up on finding a free code
const MAX_ISSUE_ATTEMPTS: usize = 32;

/// Code errors
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    #[error("No free code found after {0} attempts")]
    Exhausted(usize),
}

/// A freshly issued code
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub record: CodeRecord,
}

/// Code counts for the admin panel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeStats {
    pub total: usize,
    pub used: usize,
    /// Unused and unexpired
    pub active: usize,
}

type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Issues, redeems and expires verification codes
#[derive(Clone)]
pub struct CodeManager {
    docs: Documents,
    generator: CodeGenerator,
}

impl CodeManager {
    pub fn new(docs: Documents) -> Self {
        Self {
            docs,
            generator: Arc::new(random_code),
        }
    }

    /// Replace the random source (deterministic tests)
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Arc::new(generator);
        self
    }

    /// Issue a new code for `user_id`
    pub fn issue(&self, user_id: i64, username: Option<&str>) -> Result<IssuedCode, CodeError> {
        self.issue_at(user_id, username, Utc::now())
    }

    /// Issue a new code as of `now`
    ///
    /// Earlier codes of the same user stay valid. A drawn code that is still
    /// live for anyone is rejected and redrawn.
    pub fn issue_at(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IssuedCode, CodeError> {
        let ttl = self.docs.settings().code_ttl();

        let issued = self.docs.update(Collection::Codes, |doc: &mut CodesDocument| {
            for _ in 0..MAX_ISSUE_ATTEMPTS {
                let code = (self.generator)();
                if let Some(existing) = doc.codes.get(&code) {
                    if !existing.is_expired_at(now) {
                        debug!("Code collision, redrawing");
                        continue;
                    }
                }

                let record = CodeRecord {
                    user_id,
                    telegram_username: username.map(|u| u.to_string()),
                    created_at: now,
                    expires_at: now + ttl,
                    used: false,
                    used_at: None,
                };
                doc.codes.insert(code.clone(), record.clone());
                return Ok(IssuedCode { code, record });
            }
            Err(CodeError::Exhausted(MAX_ISSUE_ATTEMPTS))
        })?;

        info!("Issued code for user {} (expires {})", user_id, issued.record.expires_at);
        Ok(issued)
    }

    /// Redeem a code; `None` if absent, expired or already used
    pub fn redeem(&self, code: &str) -> Option<CodeRecord> {
        self.redeem_at(code, Utc::now())
    }

    /// Redeem a code as of `now`
    pub fn redeem_at(&self, code: &str, now: DateTime<Utc>) -> Option<CodeRecord> {
        let code = code.trim();
        let codes: CodesDocument = self.docs.load(Collection::Codes);
        if !codes.codes.get(code).is_some_and(|r| r.is_redeemable_at(now)) {
            debug!("Rejected code redemption");
            return None;
        }

        let redeemed = self.docs.update(Collection::Codes, |doc: &mut CodesDocument| {
            // Re-check under the lock; another redemption may have won
            let record = doc.codes.get_mut(code)?;
            if !record.is_redeemable_at(now) {
                return None;
            }
            record.used = true;
            record.used_at = Some(now);
            Some(record.clone())
        });

        if let Some(record) = &redeemed {
            info!("Code redeemed by user {}", record.user_id);
        }
        redeemed
    }

    /// Remove every expired code, returns how many were removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Remove every code expired as of `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.docs.update(Collection::Codes, |doc: &mut CodesDocument| {
            let before = doc.codes.len();
            doc.codes.retain(|_, record| !record.is_expired_at(now));
            before - doc.codes.len()
        });

        if removed > 0 {
            info!("Swept {} expired codes", removed);
        }
        removed
    }

    /// Look up a code without redeeming it
    pub fn get(&self, code: &str) -> Option<CodeRecord> {
        let codes: CodesDocument = self.docs.load(Collection::Codes);
        codes.codes.get(code).cloned()
    }

    /// Counts for the admin panel
    pub fn stats(&self) -> CodeStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> CodeStats {
        let codes: CodesDocument = self.docs.load(Collection::Codes);
        CodeStats {
            total: codes.codes.len(),
            used: codes.codes.values().filter(|r| r.used).count(),
            active: codes.codes.values().filter(|r| r.is_redeemable_at(now)).count(),
        }
    }

    /// Sweep on a fixed interval in the background
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; the start-up sweep already ran
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }
}

/// Uniform 6-digit decimal code
pub fn random_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}
