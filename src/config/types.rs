//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub bridges: Vec<BridgeMapping>,
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Do not relay messages starting with `/`.
    #[serde(default)]
    pub ignore_commands: bool,
    /// Do not tell unbridged chats that this bot is private.
    #[serde(default)]
    pub suppress_private_notice: bool,
    /// Name senders by first name instead of @username.
    #[serde(default)]
    pub use_first_name: bool,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Name senders by guild nickname when they have one.
    #[serde(default = "default_true")]
    pub use_nickname: bool,
}

/// Correlation store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    /// How long relayed messages stay editable/deletable, in seconds.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Keep correlations in SQLite so they survive restarts.
    #[serde(default)]
    pub persistent: bool,
    /// SQLite database path (used when `persistent` is set).
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            persistent: false,
            database: default_database(),
        }
    }
}

/// One relay path between a Telegram chat and a Discord channel.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeMapping {
    pub name: String,
    /// Direction: "both", "telegram_to_discord", "discord_to_telegram"
    #[serde(default = "default_direction")]
    pub direction: String,
    pub telegram: TelegramSideConfig,
    pub discord: DiscordSideConfig,
    /// Topic/thread pairs routed inside this bridge.
    #[serde(default)]
    pub threads: Vec<ThreadMapping>,
}

/// Telegram end of a bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSideConfig {
    pub chat_id: i64,
    #[serde(default = "default_true")]
    pub relay_join: bool,
    #[serde(default = "default_true")]
    pub relay_leave: bool,
    #[serde(default = "default_true")]
    pub send_usernames: bool,
    #[serde(default = "default_true")]
    pub cross_delete: bool,
}

/// Discord end of a bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordSideConfig {
    pub channel_id: i64,
    #[serde(default = "default_true")]
    pub relay_join: bool,
    #[serde(default = "default_true")]
    pub relay_leave: bool,
    #[serde(default = "default_true")]
    pub send_usernames: bool,
    #[serde(default = "default_true")]
    pub cross_delete: bool,
    /// Embed policy: "never", "auto", "always"
    #[serde(default = "default_embeds")]
    pub embeds: String,
}

/// Telegram forum topic mapped to a Discord thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMapping {
    pub telegram: i64,
    pub discord: i64,
}

fn default_true() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_database() -> String {
    "crossbridge.db".to_string()
}

fn default_direction() -> String {
    "both".to_string()
}

fn default_embeds() -> String {
    "auto".to_string()
}
