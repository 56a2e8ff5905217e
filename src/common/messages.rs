//! Canonical message types handed from platform adapters to the bridge.
//!
//! Adapters convert platform payloads into these before calling the
//! relay orchestrator, so the orchestrator never sees serenity or
//! Telegram Bot API types.

use crate::common::types::{ChatId, MessageId, TextEntity};

/// A message as seen on its source platform.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub id: MessageId,
    /// Telegram chat id or Discord parent channel id.
    pub chat_id: ChatId,
    /// Telegram forum topic or Discord thread channel.
    pub thread_id: Option<ChatId>,
    /// Raw text (Telegram) or markdown content (Discord).
    pub text: String,
    /// Formatting entities; always empty for Discord.
    pub entities: Vec<TextEntity>,
    pub author: String,
    pub reply_to: Option<ReplyRef>,
    pub forwarded_from: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl InboundMessage {
    pub fn new(id: MessageId, chat_id: ChatId, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            author: author.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread_id: ChatId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_entities(mut self, entities: Vec<TextEntity>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_reply(mut self, reply: ReplyRef) -> Self {
        self.reply_to = Some(reply);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// True when there is nothing to relay.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// The message an inbound message replies to.
#[derive(Debug, Clone, Default)]
pub struct ReplyRef {
    pub id: MessageId,
    pub author: String,
    pub text: String,
}

/// A file attached to a message, reachable by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// Membership change announced across a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    Joined,
    Left,
}
