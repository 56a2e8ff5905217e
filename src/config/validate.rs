//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use std::collections::HashSet;

use crate::bridge::state::{BridgeDirection, EmbedPolicy};
use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.telegram.token.is_empty() {
        errors.push("telegram.token is required".to_string());
    }
    if config.telegram.token == "YOUR_TELEGRAM_TOKEN_HERE" {
        errors.push("telegram.token has not been configured (still using placeholder)".to_string());
    }
    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }

    if config.messages.ttl_seconds == 0 {
        errors.push("messages.ttl_seconds must be non-zero".to_string());
    }
    if config.messages.persistent && config.messages.database.is_empty() {
        errors.push("messages.database is required when messages.persistent is set".to_string());
    }

    let mut names = HashSet::new();
    for (i, bridge) in config.bridges.iter().enumerate() {
        if bridge.name.is_empty() {
            errors.push(format!("bridges[{}].name is required", i));
        } else if !names.insert(bridge.name.as_str()) {
            errors.push(format!(
                "bridges[{}].name '{}' is used by another bridge",
                i, bridge.name
            ));
        }
        if bridge.telegram.chat_id == 0 {
            errors.push(format!("bridges[{}].telegram.chat_id must be non-zero", i));
        }
        if bridge.discord.channel_id <= 0 {
            errors.push(format!("bridges[{}].discord.channel_id must be positive", i));
        }
        if BridgeDirection::parse(&bridge.direction).is_none() {
            errors.push(format!(
                "bridges[{}].direction '{}' is invalid (use: both, telegram_to_discord, discord_to_telegram)",
                i, bridge.direction
            ));
        }
        if EmbedPolicy::parse(&bridge.discord.embeds).is_none() {
            errors.push(format!(
                "bridges[{}].discord.embeds '{}' is invalid (use: never, auto, always)",
                i, bridge.discord.embeds
            ));
        }
        for (j, thread) in bridge.threads.iter().enumerate() {
            if thread.telegram == 0 || thread.discord <= 0 {
                errors.push(format!(
                    "bridges[{}].threads[{}] must map non-zero ids",
                    i, j
                ));
            }
        }
    }

    if config.bridges.is_empty() {
        errors.push("bridges is empty - no message routing configured".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_bridge(name: &str) -> BridgeMapping {
        BridgeMapping {
            name: name.to_string(),
            direction: "both".to_string(),
            telegram: TelegramSideConfig {
                chat_id: -100123,
                relay_join: true,
                relay_leave: true,
                send_usernames: true,
                cross_delete: true,
            },
            discord: DiscordSideConfig {
                channel_id: 987654321,
                relay_join: true,
                relay_leave: true,
                send_usernames: true,
                cross_delete: true,
                embeds: "auto".to_string(),
            },
            threads: Vec::new(),
        }
    }

    fn make_valid_config() -> Config {
        Config {
            telegram: TelegramConfig {
                token: "123:abc".to_string(),
                ignore_commands: false,
                suppress_private_notice: false,
                use_first_name: false,
            },
            discord: DiscordConfig {
                token: "valid_token_here".to_string(),
                use_nickname: true,
            },
            messages: MessagesConfig::default(),
            bridges: vec![make_bridge("general")],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = "YOUR_DISCORD_TOKEN_HERE".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("placeholder"));
    }

    #[test]
    fn test_duplicate_bridge_names_fail() {
        let mut config = make_valid_config();
        config.bridges.push(make_bridge("general"));

        let result = validate_config(&config);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("'general' is used by another bridge"));
    }

    #[test]
    fn test_invalid_direction_fails() {
        let mut config = make_valid_config();
        config.bridges[0].direction = "sideways".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("direction"));
    }

    #[test]
    fn test_invalid_embed_policy_fails() {
        let mut config = make_valid_config();
        config.bridges[0].discord.embeds = "sometimes".to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("embeds"));
    }

    #[test]
    fn test_zero_ttl_and_ids_are_all_reported() {
        let mut config = make_valid_config();
        config.messages.ttl_seconds = 0;
        config.bridges[0].telegram.chat_id = 0;
        config.bridges[0].threads.push(ThreadMapping {
            telegram: 5,
            discord: 0,
        });

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("ttl_seconds"));
        assert!(message.contains("telegram.chat_id"));
        assert!(message.contains("threads[0]"));
    }

    #[test]
    fn test_empty_bridges_fail() {
        let mut config = make_valid_config();
        config.bridges.clear();
        assert!(validate_config(&config).is_err());
    }
}
