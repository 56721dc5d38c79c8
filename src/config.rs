//! Configuration management
//!
//! Secrets and deployment knobs come from the environment (optionally via `.env`).
//! Runtime-mutable bot settings (channels, AI toggle, welcome text) live in the
//! settings document instead, see [`crate::models::Settings`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

const DEFAULT_GEMINI_MODELS: &str = "gemini-2.0-flash-exp,gemini-1.5-flash,gemini-1.5-pro,gemini-pro";

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub bot_token: String,

    /// Telegram ids allowed to use admin commands (empty = nobody)
    pub admin_ids: Vec<i64>,

    /// Gemini API key (optional)
    pub gemini_api_key: Option<String>,

    /// Gemini models to probe at start-up, in preference order
    pub gemini_models: Vec<String>,

    /// OpenAI API key (optional)
    pub openai_api_key: Option<String>,

    /// OpenAI chat model
    pub openai_model: String,

    /// OpenAI-compatible base URL
    pub openai_base_url: String,

    /// Directory holding the JSON documents
    pub data_dir: PathBuf,

    /// Pause between broadcast sends
    pub broadcast_delay: Duration,

    /// Restarts allowed before the supervisor gives up
    pub max_restarts: u32,

    /// Wait between a failure and the next start
    pub restart_backoff: Duration,

    /// Expired code sweep interval (None = only at start-up)
    pub code_sweep_interval: Option<Duration>,

    /// Bind address for the redemption API (None = disabled)
    pub redeem_api_addr: Option<SocketAddr>,

    /// Shared secret expected in `x-api-key` on the redemption API
    pub redeem_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Treat empty values like unset ones
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bot_token = var("BOT_TOKEN")
            .or_else(|| var("TELOXIDE_TOKEN"))
            .ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let admin_ids = var("ADMIN_IDS")
            .map(|v| parse_admin_ids(&v))
            .unwrap_or_default();

        let gemini_models = var("GEMINI_MODELS")
            .unwrap_or_else(|| DEFAULT_GEMINI_MODELS.to_string())
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        let broadcast_delay = Duration::from_millis(parse_number(&var, "BROADCAST_DELAY_MS", 100)?);
        let max_restarts = parse_number(&var, "MAX_RESTARTS", 100u32)?;
        let restart_backoff = Duration::from_secs(parse_number(&var, "RESTART_BACKOFF_SECS", 10)?);

        let code_sweep_interval = match parse_number(&var, "CODE_SWEEP_INTERVAL_SECS", 600)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let redeem_api_addr = match var("REDEEM_API_ADDR") {
            Some(v) => Some(v.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "REDEEM_API_ADDR",
                value: v.clone(),
            })?),
            None => None,
        };

        Ok(Self {
            bot_token,
            admin_ids,
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_models,
            openai_api_key: var("OPENAI_API_KEY"),
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            openai_base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            broadcast_delay,
            max_restarts,
            restart_backoff,
            code_sweep_interval,
            redeem_api_addr,
            redeem_api_key: var("REDEEM_API_KEY"),
        })
    }

    /// Is this user on the admin allow-list?
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Token prefix that is safe to log
    pub fn token_preview(&self) -> String {
        let prefix: String = self.bot_token.chars().take(10).collect();
        format!("{}...", prefix)
    }
}

/// Parse a comma-separated id list, skipping anything that isn't an integer
pub fn parse_admin_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

fn parse_number<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BOT_TOKEN")));
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("BOT_TOKEN", "123:abc")]).unwrap();
        assert!(config.admin_ids.is_empty());
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.broadcast_delay, Duration::from_millis(100));
        assert_eq!(config.max_restarts, 100);
        assert_eq!(config.restart_backoff, Duration::from_secs(10));
        assert_eq!(config.code_sweep_interval, Some(Duration::from_secs(600)));
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.gemini_models.len(), 4);
        assert!(config.redeem_api_addr.is_none());
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn test_teloxide_token_fallback() {
        let config = config_from(&[("TELOXIDE_TOKEN", "999:xyz")]).unwrap();
        assert_eq!(config.bot_token, "999:xyz");
    }

    #[test]
    fn test_admin_ids_skip_garbage() {
        assert_eq!(parse_admin_ids("1, 2,abc,,-5"), vec![1, 2, -5]);
        let config = config_from(&[("BOT_TOKEN", "t"), ("ADMIN_IDS", "42,x")]).unwrap();
        assert!(config.is_admin(42));
        assert!(!config.is_admin(7));
    }

    #[test]
    fn test_zero_sweep_interval_disables_sweeper() {
        let config = config_from(&[("BOT_TOKEN", "t"), ("CODE_SWEEP_INTERVAL_SECS", "0")]).unwrap();
        assert!(config.code_sweep_interval.is_none());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = config_from(&[("BOT_TOKEN", "t"), ("MAX_RESTARTS", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_RESTARTS", .. }));
    }

    #[test]
    fn test_max_restarts_out_of_range_rejected() {
        let err = config_from(&[("BOT_TOKEN", "t"), ("MAX_RESTARTS", "4294967296")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_RESTARTS", .. }));

        let config = config_from(&[("BOT_TOKEN", "t"), ("MAX_RESTARTS", "4294967295")]).unwrap();
        assert_eq!(config.max_restarts, u32::MAX);
    }

    #[test]
    fn test_token_preview_hides_secret() {
        let config = config_from(&[("BOT_TOKEN", "1234567890:SECRETSECRET")]).unwrap();
        assert_eq!(config.token_preview(), "1234567890...");
    }
}
