use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_NASA_BASE_URL: &str = "https://api.nasa.gov";
const DEFAULT_LIVENESS_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub nasa: NasaConfig,
    pub liveness: LivenessConfig,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat the /apod command is registered to. Unset = every chat.
    pub home_chat: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NasaConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub port: u16,
}

/// Supervision parameters for the chat connection loop.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    /// Attempt n waits n * base_delay before retrying.
    pub base_delay: Duration,
}

fn default_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        max_attempts: 5,
        base_delay: Duration::from_secs(5),
    }
}

impl Config {
    /// Read configuration from the process environment. Fails fast when a
    /// required secret is absent, so startup aborts before anything connects.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = get("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN is not set")?;
        let api_key = get("NASA_API_KEY").context("NASA_API_KEY is not set")?;

        let home_chat = get("APOD_HOME_CHAT")
            .map(|v| v.trim().parse::<i64>())
            .transpose()
            .context("APOD_HOME_CHAT must be a numeric chat id")?;

        let port = match get("LIVENESS_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .context("LIVENESS_PORT must be a port number")?,
            None => DEFAULT_LIVENESS_PORT,
        };

        let base_url = get("NASA_API_BASE")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_NASA_BASE_URL.to_string());

        Ok(Self {
            telegram: TelegramConfig {
                bot_token,
                home_chat,
            },
            nasa: NasaConfig { api_key, base_url },
            liveness: LivenessConfig { port },
            connection: default_connection_config(),
        })
    }
}
