//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `CROSSBRIDGE_TELEGRAM_TOKEN` - Telegram bot token
//! - `CROSSBRIDGE_DISCORD_TOKEN` - Discord bot token
//! - `CROSSBRIDGE_DATABASE` - SQLite path; setting it also enables persistence
//! - `CROSSBRIDGE_CONFIG` - config file path (see [`get_config_path`])

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "CROSSBRIDGE";

/// Apply environment variable overrides to a config.
///
/// This allows tokens to be provided via environment variables
/// instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_TELEGRAM_TOKEN", ENV_PREFIX)) {
        config.telegram.token = token;
    }
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }

    if let Ok(database) = env::var(format!("{}_DATABASE", ENV_PREFIX)) {
        if !database.is_empty() {
            config.messages.database = database;
            config.messages.persistent = true;
        }
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `CROSSBRIDGE_CONFIG`, otherwise returns "crossbridge.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "crossbridge.conf".to_string())
}
