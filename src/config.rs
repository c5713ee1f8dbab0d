use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

/// How Telegram updates reach the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Long-poll `getUpdates`
    Polling,
    /// Telegram pushes updates to `POST /webhook`
    Webhook,
}

impl FromStr for UpdateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "polling" => Ok(Self::Polling),
            "webhook" => Ok(Self::Webhook),
            other => bail!("Invalid UPDATE_MODE '{}'. Expected 'polling' or 'webhook'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_url: String,
    pub update_mode: UpdateMode,
    pub telegram_webhook_secret: Option<String>,
    pub telegram_webhook_url: Option<String>,

    // Generative model (OpenAI-compatible endpoint)
    pub llm_api_key: String,
    pub llm_api_url: String,
    pub llm_model: String,

    // Persistence and caching
    pub store_url: String,
    pub cache_ttl: Duration,

    // Fan-out
    pub fanout_concurrency: usize,

    // HTTP server
    pub port: u16,
}

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_LLM_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_STORE_URL: &str = "memory://";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 4;
pub const DEFAULT_PORT: u16 = 10000;

impl Config {
    pub fn from_env() -> Result<Self> {
        let update_mode: UpdateMode = std::env::var("UPDATE_MODE")
            .unwrap_or_else(|_| "polling".to_string())
            .parse()?;

        let telegram_webhook_secret = non_empty_var("TELEGRAM_WEBHOOK_SECRET");
        if update_mode == UpdateMode::Webhook && telegram_webhook_secret.is_none() {
            bail!("TELEGRAM_WEBHOOK_SECRET must be set when UPDATE_MODE=webhook");
        }

        Ok(Self {
            // Telegram
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN not set")?,
            telegram_api_url: std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| DEFAULT_TELEGRAM_API_URL.to_string()),
            update_mode,
            telegram_webhook_secret,
            telegram_webhook_url: non_empty_var("TELEGRAM_WEBHOOK_URL"),

            // Generative model
            llm_api_key: std::env::var("GOOGLE_API_KEY").context("GOOGLE_API_KEY not set")?,
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| DEFAULT_LLM_API_URL.to_string()),
            llm_model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),

            // Persistence: STORE_URL wins, REDIS_URL kept for existing deployments
            store_url: non_empty_var("STORE_URL")
                .or_else(|| non_empty_var("REDIS_URL"))
                .unwrap_or_else(|| DEFAULT_STORE_URL.to_string()),
            cache_ttl: Duration::from_secs(
                std::env::var("CACHE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),

            fanout_concurrency: std::env::var("FANOUT_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_FANOUT_CONCURRENCY)
                .max(1),

            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
