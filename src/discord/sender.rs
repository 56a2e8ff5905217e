//! Outbound Discord operations and name lookup.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serenity::all::{
    Cache, ChannelId, CreateAllowedMentions, CreateAttachment, CreateEmbed, CreateEmbedAuthor, CreateMessage,
    EditMessage, Http, MessageId as DiscordMessageId, UserId,
};
use serenity::http::HttpError;
use tracing::debug;

use crate::bridge::outbound::{PlatformSender, SendOptions};
use crate::bridge::state::Destination;
use crate::common::error::{DispatchError, DispatchResult};
use crate::common::types::{ChatId, MessageId, Side};
use crate::discord::resolver::unique_match;
use crate::markup::NameResolver;

/// HTTP client and cache of the current gateway connection.
#[derive(Clone)]
struct Handles {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

/// Discord side of the relay.
pub struct DiscordSender {
    handles: RwLock<Handles>,
}

impl DiscordSender {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self {
            handles: RwLock::new(Handles { http, cache }),
        }
    }

    /// Point at a rebuilt client.
    pub fn attach(&self, http: Arc<Http>, cache: Arc<Cache>) {
        *self.handles.write().unwrap_or_else(PoisonError::into_inner) = Handles { http, cache };
    }

    fn handles(&self) -> Handles {
        self.handles.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Existing embed author of a relayed message, kept across edits.
    async fn embed_author(&self, handles: &Handles, channel: ChannelId, message: DiscordMessageId) -> Option<String> {
        let existing = channel.message((&handles.cache, handles.http.as_ref()), message).await.ok()?;
        existing
            .embeds
            .first()
            .and_then(|embed| embed.author.as_ref())
            .map(|author| author.name.clone())
    }
}

/// Convert a stored id to a channel id.
pub fn to_channel_id(id: ChatId) -> DispatchResult<ChannelId> {
    u64::try_from(id)
        .ok()
        .filter(|v| *v != 0)
        .map(ChannelId::new)
        .ok_or_else(|| DispatchError::rejected(format!("invalid channel id {}", id)))
}

fn to_message_id(id: MessageId) -> DispatchResult<DiscordMessageId> {
    u64::try_from(id)
        .ok()
        .filter(|v| *v != 0)
        .map(DiscordMessageId::new)
        .ok_or_else(|| DispatchError::rejected(format!("invalid message id {}", id)))
}

/// Snowflake as a stored id.
pub fn from_snowflake(id: u64) -> ChatId {
    i64::try_from(id).unwrap_or(i64::MAX)
}

/// Only the listed users are pinged; typed `@everyone` or role tokens never are.
fn allowed_mentions(users: &[u64]) -> CreateAllowedMentions {
    CreateAllowedMentions::new()
        .users(users.iter().copied().filter(|id| *id != 0).map(UserId::new))
        .replied_user(true)
}

/// Edit payload. Switching between plain and embed clears the other form.
fn edit_builder(markup: &str, as_embed: bool, author: Option<String>) -> EditMessage {
    if as_embed {
        let mut embed = CreateEmbed::new().description(markup);
        if let Some(author) = author {
            embed = embed.author(CreateEmbedAuthor::new(author));
        }
        EditMessage::new().content("").embed(embed)
    } else {
        EditMessage::new().content(markup).embeds(Vec::new())
    }
}

fn classify(error: serenity::Error) -> DispatchError {
    match &error {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            if response.status_code.as_u16() == 404 {
                DispatchError::not_found(error.to_string())
            } else {
                DispatchError::rejected(error.to_string())
            }
        }
        serenity::Error::Http(_) => DispatchError::Transport {
            message: error.to_string(),
        },
        _ => DispatchError::rejected(error.to_string()),
    }
}

#[async_trait]
impl PlatformSender for DiscordSender {
    fn side(&self) -> Side {
        Side::Discord
    }

    async fn send_message(
        &self,
        destination: Destination,
        markup: &str,
        options: SendOptions,
    ) -> DispatchResult<MessageId> {
        let channel = to_channel_id(destination.chat_id)?;
        let handles = self.handles();

        let mut builder = CreateMessage::new();
        if options.as_embed {
            let mut embed = CreateEmbed::new().description(markup);
            if let Some(author) = &options.embed_author {
                embed = embed.author(CreateEmbedAuthor::new(author));
            }
            builder = builder.embed(embed);
        } else if !markup.is_empty() {
            builder = builder.content(markup);
        }
        if let Some(reply_to) = options.reply_to {
            builder = builder.reference_message((channel, to_message_id(reply_to)?));
        }
        builder = builder.allowed_mentions(allowed_mentions(&options.mentions));
        for attachment in &options.attachments {
            let file = CreateAttachment::url(&handles.http, &attachment.url)
                .await
                .map_err(classify)?;
            builder = builder.add_file(file);
        }

        let message = channel
            .send_message((&handles.cache, handles.http.as_ref()), builder)
            .await
            .map_err(classify)?;
        Ok(from_snowflake(message.id.get()))
    }

    async fn edit_message(
        &self,
        destination: Destination,
        message_id: MessageId,
        markup: &str,
        as_embed: bool,
    ) -> DispatchResult<()> {
        let channel = to_channel_id(destination.chat_id)?;
        let message = to_message_id(message_id)?;
        let handles = self.handles();

        let author = if as_embed {
            self.embed_author(&handles, channel, message).await
        } else {
            None
        };
        let builder = edit_builder(markup, as_embed, author);

        channel
            .edit_message((&handles.cache, handles.http.as_ref()), message, builder)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_message(&self, destination: Destination, message_id: MessageId) -> DispatchResult<()> {
        let channel = to_channel_id(destination.chat_id)?;
        let message = to_message_id(message_id)?;
        let handles = self.handles();

        channel
            .delete_message((&handles.cache, handles.http.as_ref()), message)
            .await
            .map_err(classify)
    }
}

impl NameResolver for DiscordSender {
    fn find_user_by_display_name(&self, name: &str) -> Option<u64> {
        let cache = self.handles().cache;
        let self_id = cache.current_user().id;

        let mut candidates: Vec<(String, u64)> = Vec::new();
        for guild_id in cache.guilds() {
            let Some(guild) = cache.guild(guild_id) else {
                continue;
            };
            for (user_id, member) in &guild.members {
                if *user_id == self_id {
                    continue;
                }
                if let Some(nick) = &member.nick {
                    candidates.push((nick.clone(), user_id.get()));
                }
                if let Some(global) = &member.user.global_name {
                    candidates.push((global.clone(), user_id.get()));
                }
                candidates.push((member.user.name.clone(), user_id.get()));
            }
        }

        let found = unique_match(&candidates, name);
        if found.is_none() {
            debug!(name, candidates = candidates.len(), "No unique member for name");
        }
        found
    }

    fn find_channel_by_name(&self, name: &str) -> Option<u64> {
        let cache = self.handles().cache;
        let mut found: Vec<u64> = Vec::new();
        for guild_id in cache.guilds() {
            let Some(guild) = cache.guild(guild_id) else {
                continue;
            };
            found.extend(
                guild
                    .channels
                    .values()
                    .filter(|channel| channel.name.eq_ignore_ascii_case(name))
                    .map(|channel| channel.id.get()),
            );
        }
        match found.as_slice() {
            [id] => Some(*id),
            _ => None,
        }
    }
}
