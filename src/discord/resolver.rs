//! Mention and name resolution for Discord.
//!
//! Inbound: Discord tokens (`<@id>`, `<@&id>`, `<#id>`, `<:name:id>`) are
//! rendered as readable text before the markdown is translated for
//! Telegram. Outbound: names typed on Telegram are matched against cached
//! guild members and channels.

use fancy_regex::Regex;
use serenity::cache::Cache;
use serenity::model::id::{ChannelId, RoleId, UserId};

/// Names that Discord reserves for mass mentions.
const RESERVED_TAGS: &[&str] = &["here", "everyone"];

/// Renders Discord mention tokens as plain text.
#[derive(Debug, Clone)]
pub struct MessageResolver {
    /// Pattern for Discord user mentions (<@123> or <@!123>).
    mention_pattern: Regex,
    /// Pattern for Discord channel mentions (<#123>).
    channel_pattern: Regex,
    /// Pattern for Discord role mentions (<@&123>).
    role_pattern: Regex,
    /// Pattern for Discord custom emojis (<:name:id> or <a:name:id>).
    emoji_pattern: Regex,
}

impl MessageResolver {
    pub fn new() -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            mention_pattern: Regex::new(r"<@!?(\d+)>")?,
            channel_pattern: Regex::new(r"<#(\d+)>")?,
            role_pattern: Regex::new(r"<@&(\d+)>")?,
            emoji_pattern: Regex::new(r"<a?:([a-zA-Z0-9_]+):\d+>")?,
        })
    }

    /// Convert <@123> to @name.
    pub fn resolve_mentions_to_text(&self, message: &str, cache: &Cache) -> String {
        self.mention_pattern
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                if let Some(user_id) = parse_id(&caps[1]) {
                    if let Some(user) = cache.user(UserId::new(user_id)) {
                        return format!("@{}", user.global_name.as_deref().unwrap_or(&user.name));
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// Convert <#123> to #name.
    pub fn resolve_channel_mentions(&self, message: &str, cache: &Cache) -> String {
        self.channel_pattern
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                if let Some(channel_id) = parse_id(&caps[1]) {
                    let channel_id = ChannelId::new(channel_id);
                    for guild_id in cache.guilds() {
                        if let Some(guild) = cache.guild(guild_id) {
                            if let Some(channel) = guild.channels.get(&channel_id) {
                                return format!("#{}", channel.name);
                            }
                            if let Some(thread) = guild.threads.iter().find(|t| t.id == channel_id) {
                                return format!("#{}", thread.name);
                            }
                        }
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// Convert <@&123> to @role.
    pub fn resolve_role_mentions(&self, message: &str, cache: &Cache) -> String {
        self.role_pattern
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                if let Some(role_id) = parse_id(&caps[1]) {
                    for guild_id in cache.guilds() {
                        if let Some(guild) = cache.guild(guild_id) {
                            if let Some(role) = guild.roles.get(&RoleId::new(role_id)) {
                                return format!("@{}", role.name);
                            }
                        }
                    }
                }
                caps[0].to_string()
            })
            .to_string()
    }

    /// Convert <:name:123> to :name:.
    pub fn resolve_custom_emojis_to_text(&self, message: &str) -> String {
        self.emoji_pattern.replace_all(message, ":$1:").to_string()
    }

    /// Full inbound pipeline for a Discord message headed to Telegram.
    pub fn process_discord_content(&self, message: &str, cache: &Cache) -> String {
        let step1 = self.resolve_role_mentions(message, cache);
        let step2 = self.resolve_mentions_to_text(&step1, cache);
        let step3 = self.resolve_channel_mentions(&step2, cache);
        self.resolve_custom_emojis_to_text(&step3)
    }
}

/// Parse a snowflake, rejecting zero.
fn parse_id(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}

/// Match `tag` against `(name, id)` candidates.
///
/// Preference order:
/// 1. Exact (case-insensitive) matches
/// 2. Whole-word matches
/// 3. Substring matches
///
/// Mass-mention keywords never match.
pub fn match_names(names: &[(String, u64)], tag: &str) -> Vec<(String, u64)> {
    let lower_tag = tag.trim().to_lowercase();
    if lower_tag.is_empty() || RESERVED_TAGS.contains(&lower_tag.as_str()) {
        return Vec::new();
    }

    let initial_matches: Vec<&(String, u64)> = names
        .iter()
        .filter(|(name, _)| name.to_lowercase().contains(&lower_tag))
        .collect();

    if initial_matches.len() > 1 {
        let exact: Vec<&(String, u64)> = initial_matches
            .iter()
            .filter(|(name, _)| name.to_lowercase() == lower_tag)
            .copied()
            .collect();
        if !exact.is_empty() {
            return dedup(exact);
        }

        if !lower_tag.contains(' ') {
            let word_matches: Vec<&(String, u64)> = initial_matches
                .iter()
                .filter(|(name, _)| {
                    name.to_lowercase()
                        .split(|c: char| !c.is_alphanumeric())
                        .any(|word| word == lower_tag)
                })
                .copied()
                .collect();
            if !word_matches.is_empty() {
                return dedup(word_matches);
            }
        }
    }

    dedup(initial_matches)
}

/// Keep one entry per id, first name wins.
fn dedup(matches: Vec<&(String, u64)>) -> Vec<(String, u64)> {
    let mut out: Vec<(String, u64)> = Vec::with_capacity(matches.len());
    for (name, id) in matches {
        if !out.iter().any(|(_, seen)| seen == id) {
            out.push((name.clone(), *id));
        }
    }
    out
}

/// The single id `tag` refers to, if unambiguous.
pub fn unique_match(names: &[(String, u64)], tag: &str) -> Option<u64> {
    match match_names(names, tag).as_slice() {
        [(_, id)] => Some(*id),
        _ => None,
    }
}
