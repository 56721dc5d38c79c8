//! Gatebot - Entry Point
//!
//! Runs the Telegram bot under the supervisor and, when configured, the
//! redemption API next to it.

use std::sync::Arc;

use gatebot::ai::{gemini::GeminiBackend, openai::OpenAiBackend};
use gatebot::api::{self, ApiState};
use gatebot::store::ensure_data_dir;
use gatebot::{
    telegram, Backends, BotState, Config, Documents, RestartPolicy, Supervisor, TelegramPlatform,
};
use teloxide::Bot;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Gatebot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: gatebot");
        println!();
        println!("Environment variables:");
        println!("  BOT_TOKEN                  Telegram bot token (or TELOXIDE_TOKEN)");
        println!("  ADMIN_IDS                  Comma-separated admin Telegram ids");
        println!("  GEMINI_API_KEY             Gemini API key");
        println!("  GEMINI_MODELS              Gemini models to probe, in order");
        println!("  OPENAI_API_KEY             OpenAI API key");
        println!("  OPENAI_MODEL               OpenAI model (default: gpt-4o-mini)");
        println!("  OPENAI_BASE_URL            OpenAI-compatible endpoint");
        println!("  DATA_DIR                   JSON document directory (default: data)");
        println!("  BROADCAST_DELAY_MS         Pause between broadcast sends (default: 100)");
        println!("  MAX_RESTARTS               Failures before giving up (default: 100)");
        println!("  RESTART_BACKOFF_SECS       Wait before restarting (default: 10)");
        println!("  CODE_SWEEP_INTERVAL_SECS   Expired code sweep, 0 = start-up only (default: 600)");
        println!("  REDEEM_API_ADDR            Bind address for the redemption API");
        println!("  REDEEM_API_KEY             Required x-api-key for the redemption API");
        println!("  LOG_FORMAT                 Set to 'json' for JSON logs");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Gatebot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Token: {}", config.token_preview());
    info!("Admins: {:?}", config.admin_ids);

    ensure_data_dir(&config.data_dir)?;
    let docs = Documents::open(config.data_dir.clone());

    // AI backends
    let mut backends = Backends::new();
    if let Some(key) = &config.gemini_api_key {
        match GeminiBackend::probe(key, &config.gemini_models).await {
            Some(gemini) => {
                info!("Gemini ready with model {}", gemini.model());
                backends = backends.with(Arc::new(gemini));
            }
            None => warn!("No Gemini model answered, Gemini disabled"),
        }
    }
    if let Some(key) = &config.openai_api_key {
        info!("OpenAI ready with model {}", config.openai_model);
        backends = backends.with(Arc::new(OpenAiBackend::new(
            &config.openai_base_url,
            &config.openai_model,
            Some(key.clone()),
        )));
    }

    let platform = Arc::new(TelegramPlatform::new(Bot::new(config.bot_token.clone())));
    let policy = RestartPolicy {
        max_restarts: config.max_restarts,
        backoff: config.restart_backoff,
    };
    let sweep_interval = config.code_sweep_interval;
    let api_addr = config.redeem_api_addr;
    let api_key = config.redeem_api_key.clone();

    let state = Arc::new(BotState::new(config, docs, platform.clone(), backends));

    let removed = state.codes.sweep();
    if removed > 0 {
        info!("Removed {} expired codes", removed);
    }
    if let Some(interval) = sweep_interval {
        state.codes.spawn_sweeper(interval);
    }

    if let Some(addr) = api_addr {
        let api_state = Arc::new(ApiState {
            codes: state.codes.clone(),
            users: state.users.clone(),
            api_key,
        });
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, api_state).await {
                warn!("Redemption API stopped: {:#}", e);
            }
        });
    }

    let supervisor = Supervisor::new(policy);
    let exit = supervisor
        .run(
            || telegram::run_bot(platform.clone(), state.clone()),
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
        )
        .await;

    let stats = supervisor.stats();
    info!(
        "Shut down: {:?} after {} starts, {} failures",
        exit, stats.starts, stats.failures
    );

    Ok(())
}
