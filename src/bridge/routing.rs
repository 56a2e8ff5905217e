//! Bridge routing table.
//!
//! Resolves an inbound Telegram chat or Discord channel (optionally with a
//! topic/thread) to the bridges that apply to it. Lookups on unknown ids
//! return an empty list, which callers treat as "not bridged".

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bridge::state::BridgeConfig;
use crate::common::types::{ChatId, Side};

/// Index of bridges by the chat/channel they are bound to.
#[derive(Debug, Default)]
pub struct RoutingTable {
    /// All configured bridges, in configuration order.
    bridges: Vec<Arc<BridgeConfig>>,
    /// Index: Telegram chat -> bridge positions.
    by_telegram: HashMap<ChatId, Vec<usize>>,
    /// Index: Discord channel -> bridge positions.
    by_discord: HashMap<ChatId, Vec<usize>>,
    /// Index: (Telegram chat, topic) -> thread-bound clones by bridge position.
    telegram_threads: HashMap<(ChatId, ChatId), HashMap<usize, Arc<BridgeConfig>>>,
    /// Index: (Discord channel, thread) -> thread-bound clones by bridge position.
    discord_threads: HashMap<(ChatId, ChatId), HashMap<usize, Arc<BridgeConfig>>>,
}

impl RoutingTable {
    /// Build the indices from the full bridge set.
    pub fn new(configs: Vec<BridgeConfig>) -> Self {
        let mut table = Self::default();

        for config in configs {
            let idx = table.bridges.len();

            table
                .by_telegram
                .entry(config.telegram.chat_id)
                .or_default()
                .push(idx);
            table
                .by_discord
                .entry(config.discord.channel_id)
                .or_default()
                .push(idx);

            for route in &config.threads {
                let threaded = Arc::new(config.for_thread(route));
                table
                    .telegram_threads
                    .entry((config.telegram.chat_id, route.telegram_thread_id))
                    .or_default()
                    .insert(idx, Arc::clone(&threaded));
                table
                    .discord_threads
                    .entry((config.discord.channel_id, route.discord_thread_id))
                    .or_default()
                    .insert(idx, threaded);
            }

            debug!(
                bridge = %config.name,
                telegram_chat = config.telegram.chat_id,
                discord_channel = config.discord.channel_id,
                threads = config.threads.len(),
                "Registered bridge"
            );
            table.bridges.push(Arc::new(config));
        }

        table
    }

    /// Bridges bound to a Telegram chat, in configuration order.
    pub fn by_telegram_chat(&self, chat_id: ChatId, thread_id: Option<ChatId>) -> Vec<Arc<BridgeConfig>> {
        Self::lookup(
            &self.bridges,
            self.by_telegram.get(&chat_id),
            thread_id.and_then(|t| self.telegram_threads.get(&(chat_id, t))),
        )
    }

    /// Bridges bound to a Discord channel, in configuration order.
    ///
    /// `channel_id` is the parent channel when the message came from a thread.
    pub fn by_discord_channel(&self, channel_id: ChatId, thread_id: Option<ChatId>) -> Vec<Arc<BridgeConfig>> {
        Self::lookup(
            &self.bridges,
            self.by_discord.get(&channel_id),
            thread_id.and_then(|t| self.discord_threads.get(&(channel_id, t))),
        )
    }

    /// Lookup on whichever side an event came from.
    pub fn by_side(&self, side: Side, chat_id: ChatId, thread_id: Option<ChatId>) -> Vec<Arc<BridgeConfig>> {
        match side {
            Side::Telegram => self.by_telegram_chat(chat_id, thread_id),
            Side::Discord => self.by_discord_channel(chat_id, thread_id),
        }
    }

    /// All configured bridges.
    pub fn bridges(&self) -> &[Arc<BridgeConfig>] {
        &self.bridges
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    fn lookup(
        bridges: &[Arc<BridgeConfig>],
        indices: Option<&Vec<usize>>,
        threaded: Option<&HashMap<usize, Arc<BridgeConfig>>>,
    ) -> Vec<Arc<BridgeConfig>> {
        let Some(indices) = indices else {
            return Vec::new();
        };

        indices
            .iter()
            .map(|&i| {
                threaded
                    .and_then(|t| t.get(&i))
                    .map(Arc::clone)
                    .unwrap_or_else(|| Arc::clone(&bridges[i]))
            })
            .collect()
    }
}

/// Shared routing table reference for use across async tasks.
pub type SharedRoutingTable = Arc<RoutingTable>;
