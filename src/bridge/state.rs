//! Bridge configuration as seen by the relay core.
//!
//! `BridgeConfig` is built once from the parsed config file and is never
//! mutated afterwards; a reload builds a fresh set and a fresh routing table.

use crate::common::types::{ChatId, Direction, Side};
use crate::config::types::BridgeMapping;

/// Which flows a bridge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDirection {
    Both,
    TelegramToDiscord,
    DiscordToTelegram,
}

impl BridgeDirection {
    /// Parse direction from config string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "both" => Some(Self::Both),
            "telegram_to_discord" | "t2d" => Some(Self::TelegramToDiscord),
            "discord_to_telegram" | "d2t" => Some(Self::DiscordToTelegram),
            _ => None,
        }
    }

    /// Check if this bridge carries messages flowing in `direction`.
    pub fn allows(&self, direction: Direction) -> bool {
        match self {
            Self::Both => true,
            Self::TelegramToDiscord => direction == Direction::TelegramToDiscord,
            Self::DiscordToTelegram => direction == Direction::DiscordToTelegram,
        }
    }
}

/// When Discord-bound messages are rendered as embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedPolicy {
    Never,
    #[default]
    Auto,
    Always,
}

impl EmbedPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "never" => Some(Self::Never),
            "auto" => Some(Self::Auto),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Behavior for events originating on one side of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideFlags {
    pub relay_join: bool,
    pub relay_leave: bool,
    pub send_usernames: bool,
    pub cross_delete: bool,
}

impl Default for SideFlags {
    fn default() -> Self {
        Self {
            relay_join: true,
            relay_leave: true,
            send_usernames: true,
            cross_delete: true,
        }
    }
}

/// Telegram end of a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramEnd {
    pub chat_id: ChatId,
    /// Forum topic, set only on thread-substituted routes.
    pub thread_id: Option<ChatId>,
    pub flags: SideFlags,
}

/// Discord end of a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordEnd {
    /// Channel id; a thread channel on thread-substituted routes.
    pub channel_id: ChatId,
    pub flags: SideFlags,
    pub embeds: EmbedPolicy,
}

/// A Telegram topic bound to a Discord thread inside one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRoute {
    pub telegram_thread_id: ChatId,
    pub discord_thread_id: ChatId,
}

/// Where a relayed message goes on its destination platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub chat_id: ChatId,
    pub thread_id: Option<ChatId>,
}

impl Destination {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            thread_id: None,
        }
    }
}

/// One configured relay path between a Telegram chat and a Discord channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Unique, stable identifier; correlation keys are scoped by it.
    pub name: String,
    pub direction: BridgeDirection,
    pub telegram: TelegramEnd,
    pub discord: DiscordEnd,
    pub threads: Vec<ThreadRoute>,
}

impl BridgeConfig {
    /// Build from a validated config mapping.
    ///
    /// Unknown direction or embed strings fall back to `Both` / `Auto`;
    /// validation rejects them before this point.
    pub fn from_mapping(mapping: &BridgeMapping) -> Self {
        Self {
            name: mapping.name.clone(),
            direction: BridgeDirection::parse(&mapping.direction).unwrap_or(BridgeDirection::Both),
            telegram: TelegramEnd {
                chat_id: mapping.telegram.chat_id,
                thread_id: None,
                flags: SideFlags {
                    relay_join: mapping.telegram.relay_join,
                    relay_leave: mapping.telegram.relay_leave,
                    send_usernames: mapping.telegram.send_usernames,
                    cross_delete: mapping.telegram.cross_delete,
                },
            },
            discord: DiscordEnd {
                channel_id: mapping.discord.channel_id,
                flags: SideFlags {
                    relay_join: mapping.discord.relay_join,
                    relay_leave: mapping.discord.relay_leave,
                    send_usernames: mapping.discord.send_usernames,
                    cross_delete: mapping.discord.cross_delete,
                },
                embeds: EmbedPolicy::parse(&mapping.discord.embeds).unwrap_or_default(),
            },
            threads: mapping
                .threads
                .iter()
                .map(|t| ThreadRoute {
                    telegram_thread_id: t.telegram,
                    discord_thread_id: t.discord,
                })
                .collect(),
        }
    }

    /// Minimal bidirectional bridge with default flags.
    pub fn new(name: impl Into<String>, telegram_chat_id: ChatId, discord_channel_id: ChatId) -> Self {
        Self {
            name: name.into(),
            direction: BridgeDirection::Both,
            telegram: TelegramEnd {
                chat_id: telegram_chat_id,
                thread_id: None,
                flags: SideFlags::default(),
            },
            discord: DiscordEnd {
                channel_id: discord_channel_id,
                flags: SideFlags::default(),
                embeds: EmbedPolicy::Auto,
            },
            threads: Vec::new(),
        }
    }

    /// Flags governing events that originate on `side`.
    pub fn flags(&self, side: Side) -> &SideFlags {
        match side {
            Side::Telegram => &self.telegram.flags,
            Side::Discord => &self.discord.flags,
        }
    }

    /// Where messages for `side` are sent.
    pub fn destination(&self, side: Side) -> Destination {
        match side {
            Side::Telegram => Destination {
                chat_id: self.telegram.chat_id,
                thread_id: self.telegram.thread_id,
            },
            Side::Discord => Destination::new(self.discord.channel_id),
        }
    }

    /// Clone of this bridge bound to one topic/thread pair.
    pub fn for_thread(&self, route: &ThreadRoute) -> Self {
        let mut config = self.clone();
        config.telegram.thread_id = Some(route.telegram_thread_id);
        config.discord.channel_id = route.discord_thread_id;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!(BridgeDirection::parse("both"), Some(BridgeDirection::Both));
        assert_eq!(
            BridgeDirection::parse("Telegram_To_Discord"),
            Some(BridgeDirection::TelegramToDiscord)
        );
        assert_eq!(BridgeDirection::parse("d2t"), Some(BridgeDirection::DiscordToTelegram));
        assert_eq!(BridgeDirection::parse("invalid"), None);
    }

    #[test]
    fn test_direction_allows() {
        assert!(BridgeDirection::Both.allows(Direction::DiscordToTelegram));
        assert!(BridgeDirection::TelegramToDiscord.allows(Direction::TelegramToDiscord));
        assert!(!BridgeDirection::TelegramToDiscord.allows(Direction::DiscordToTelegram));
    }

    #[test]
    fn test_for_thread_substitutes_both_ends() {
        let config = BridgeConfig::new("general", -100, 500);
        let route = ThreadRoute {
            telegram_thread_id: 7,
            discord_thread_id: 900,
        };
        let threaded = config.for_thread(&route);

        assert_eq!(threaded.name, "general");
        assert_eq!(threaded.discord.channel_id, 900);
        assert_eq!(
            threaded.destination(Side::Telegram),
            Destination {
                chat_id: -100,
                thread_id: Some(7)
            }
        );
        assert_eq!(config.discord.channel_id, 500);
    }
}
