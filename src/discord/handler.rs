//! Discord event handling.
//!
//! Converts serenity events into relay calls. Conversion reads the cache
//! synchronously; the relay itself runs in a spawned task per event.

use std::sync::Arc;

use serenity::all::{Cache, ChannelId, Context, GuildId, Message, MessageId, MessageUpdateEvent, User};
use tracing::debug;

use crate::bridge::routing::SharedRoutingTable;
use crate::bridge::RelayOrchestrator;
use crate::common::messages::{Attachment, InboundMessage, MemberEvent, ReplyRef};
use crate::common::types::{ChatId, Side};
use crate::discord::resolver::MessageResolver;
use crate::discord::sender::{from_snowflake, to_channel_id};

/// Bridges serenity events to the relay orchestrator.
pub struct BridgeHandler {
    relay: Arc<RelayOrchestrator>,
    routing: SharedRoutingTable,
    resolver: MessageResolver,
    /// Prefer guild nicknames for sender names.
    use_nickname: bool,
}

impl BridgeHandler {
    pub fn new(
        relay: Arc<RelayOrchestrator>,
        routing: SharedRoutingTable,
        resolver: MessageResolver,
        use_nickname: bool,
    ) -> Self {
        Self {
            relay,
            routing,
            resolver,
            use_nickname,
        }
    }

    pub fn handle_message(&self, ctx: &Context, message: Message) {
        if !is_relayable(&ctx.cache, &message.author) || message.webhook_id.is_some() || message.guild_id.is_none() {
            return;
        }

        let inbound = self.to_inbound(&ctx.cache, &message);
        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            let outcomes = relay.on_create(Side::Discord, inbound).await;
            debug!(?outcomes, "Discord message handled");
        });
    }

    pub fn handle_update(&self, ctx: &Context, event: MessageUpdateEvent) {
        if let Some(author) = &event.author {
            if !is_relayable(&ctx.cache, author) {
                return;
            }
        }
        // Embed resolution and pin updates carry no content.
        let Some(content) = event.content.as_deref() else {
            return;
        };

        let (chat_id, thread_id) = locate(&ctx.cache, event.guild_id, event.channel_id);
        let author = event
            .author
            .as_ref()
            .map(display_name)
            .unwrap_or_default();
        let mut inbound = InboundMessage::new(
            from_snowflake(event.id.get()),
            chat_id,
            author,
            self.resolver.process_discord_content(content, &ctx.cache),
        );
        inbound.thread_id = thread_id;
        if let Some(attachments) = &event.attachments {
            inbound.attachments = attachments
                .iter()
                .map(|a| Attachment::new(a.url.clone(), a.filename.clone()))
                .collect();
        }

        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            let outcomes = relay.on_edit(Side::Discord, inbound).await;
            debug!(?outcomes, "Discord edit handled");
        });
    }

    pub fn handle_delete(&self, ctx: &Context, channel_id: ChannelId, guild_id: Option<GuildId>, message_id: MessageId) {
        let (chat_id, thread_id) = locate(&ctx.cache, guild_id, channel_id);
        let message_id = from_snowflake(message_id.get());

        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            let outcomes = relay.on_delete(Side::Discord, chat_id, thread_id, message_id).await;
            debug!(?outcomes, "Discord delete handled");
        });
    }

    /// Announce a member change in every bridged channel of the guild.
    pub fn handle_member(&self, ctx: &Context, guild_id: GuildId, user: &User, event: MemberEvent) {
        if user.bot {
            return;
        }
        let channels: Vec<ChatId> = {
            let Some(guild) = ctx.cache.guild(guild_id) else {
                return;
            };
            let mut channels: Vec<ChatId> = self
                .routing
                .bridges()
                .iter()
                .map(|bridge| bridge.discord.channel_id)
                .filter(|id| {
                    to_channel_id(*id)
                        .map(|channel| guild.channels.contains_key(&channel))
                        .unwrap_or(false)
                })
                .collect();
            channels.sort_unstable();
            channels.dedup();
            channels
        };
        if channels.is_empty() {
            return;
        }

        let name = display_name(user);
        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            for channel in channels {
                let outcomes = relay.on_member(Side::Discord, channel, &name, event).await;
                debug!(?outcomes, channel, "Discord member event handled");
            }
        });
    }

    fn to_inbound(&self, cache: &Cache, message: &Message) -> InboundMessage {
        let (chat_id, thread_id) = locate(cache, message.guild_id, message.channel_id);
        let mut inbound = InboundMessage::new(
            from_snowflake(message.id.get()),
            chat_id,
            self.author_name(message),
            self.resolver.process_discord_content(&message.content, cache),
        );
        inbound.thread_id = thread_id;

        if let Some(replied) = &message.referenced_message {
            inbound.reply_to = Some(ReplyRef {
                id: from_snowflake(replied.id.get()),
                author: display_name(&replied.author),
                text: self.resolver.process_discord_content(&replied.content, cache),
            });
        }
        inbound.attachments = message
            .attachments
            .iter()
            .map(|a| Attachment::new(a.url.clone(), a.filename.clone()))
            .collect();

        inbound
    }

    fn author_name(&self, message: &Message) -> String {
        if self.use_nickname {
            if let Some(nick) = message.member.as_ref().and_then(|m| m.nick.clone()) {
                return nick;
            }
        }
        display_name(&message.author)
    }
}

fn display_name(user: &User) -> String {
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}

/// Messages from this bot and from other bots are never relayed.
fn is_relayable(cache: &Cache, author: &User) -> bool {
    !author.bot && author.id != cache.current_user().id
}

/// Parent channel and thread for a channel id.
///
/// Threads are reported as `(parent, Some(thread))`; everything else as
/// `(channel, None)`.
fn locate(cache: &Cache, guild_id: Option<GuildId>, channel_id: ChannelId) -> (ChatId, Option<ChatId>) {
    let parent = guild_id
        .and_then(|id| cache.guild(id))
        .and_then(|guild| {
            guild
                .threads
                .iter()
                .find(|thread| thread.id == channel_id)
                .and_then(|thread| thread.parent_id)
        });

    match parent {
        Some(parent) => (from_snowflake(parent.get()), Some(from_snowflake(channel_id.get()))),
        None => (from_snowflake(channel_id.get()), None),
    }
}
