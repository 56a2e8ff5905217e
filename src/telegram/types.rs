//! Telegram Bot API payloads.
//!
//! Only the fields the relay reads are modelled; everything else in the
//! JSON is ignored by serde.

use serde::Deserialize;

use crate::common::types::{ChatId, EntityKind, MessageId, TextEntity};

/// Envelope of every Bot API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub channel_post: Option<Message>,
    pub edited_channel_post: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub message_thread_id: Option<ChatId>,
    #[serde(default)]
    pub is_topic_message: bool,
    pub chat: Chat,
    pub from: Option<User>,
    /// Set for anonymous admins and channel posts.
    pub sender_chat: Option<Chat>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    pub reply_to_message: Option<Box<Message>>,
    pub forward_origin: Option<MessageOrigin>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub document: Option<Document>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
    pub left_chat_member: Option<User>,
}

impl Message {
    /// Text or caption, with the matching entities.
    pub fn body(&self) -> (&str, &[MessageEntity]) {
        match (&self.text, &self.caption) {
            (Some(text), _) => (text.as_str(), self.entities.as_slice()),
            (None, Some(caption)) => (caption.as_str(), self.caption_entities.as_slice()),
            (None, None) => ("", &[]),
        }
    }

    /// Forum topic the message was posted in.
    pub fn topic(&self) -> Option<ChatId> {
        if self.is_topic_message {
            self.message_thread_id
        } else {
            None
        }
    }

    /// Display name of whoever posted the message.
    pub fn author_name(&self, use_first_name: bool) -> String {
        if let Some(chat) = &self.sender_chat {
            return chat.display_name();
        }
        match &self.from {
            Some(user) => user.display_name(use_first_name),
            None => self.chat.display_name(),
        }
    }

    /// Largest photo size, or the attached document.
    pub fn file(&self) -> Option<(&str, String)> {
        if let Some(photo) = self.photo.iter().max_by_key(|p| p.width * p.height) {
            return Some((photo.file_id.as_str(), format!("photo_{}.jpg", self.message_id)));
        }
        self.document.as_ref().map(|document| {
            let name = document
                .file_name
                .clone()
                .unwrap_or_else(|| format!("file_{}", self.message_id));
            (document.file_id.as_str(), name)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl Chat {
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.username.clone())
            .or_else(|| self.first_name.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }

    /// Username unless first names are preferred or there is none.
    pub fn display_name(&self, use_first_name: bool) -> String {
        match (&self.username, use_first_name) {
            (Some(username), false) => username.clone(),
            _ => self.full_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    pub url: Option<String>,
    pub user: Option<User>,
    pub language: Option<String>,
}

impl MessageEntity {
    pub fn to_text_entity(&self) -> TextEntity {
        let kind = EntityKind::from_telegram(&self.kind);
        let auxiliary = match kind {
            EntityKind::TextLink => self.url.clone(),
            EntityKind::Pre => self.language.clone(),
            EntityKind::TextMention => self.user.as_ref().map(User::full_name),
            _ => None,
        };
        let entity = TextEntity::new(self.offset, self.length, kind);
        match auxiliary {
            Some(auxiliary) => entity.with_auxiliary(auxiliary),
            None => entity,
        }
    }
}

/// Where a forwarded message came from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    User { sender_user: User },
    HiddenUser { sender_user_name: String },
    Chat { sender_chat: Chat },
    Channel { chat: Chat },
}

impl MessageOrigin {
    pub fn name(&self, use_first_name: bool) -> String {
        match self {
            Self::User { sender_user } => sender_user.display_name(use_first_name),
            Self::HiddenUser { sender_user_name } => sender_user_name.clone(),
            Self::Chat { sender_chat } => sender_chat.display_name(),
            Self::Channel { chat } => chat.display_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_path: Option<String>,
}
