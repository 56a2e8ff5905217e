//! Shared types used across the application.

use std::fmt;

/// Chat, channel or thread identifier on either platform.
///
/// Telegram chat ids are signed; Discord snowflakes fit in the positive range.
pub type ChatId = i64;

/// Message identifier on either platform.
pub type MessageId = i64;

/// One of the two bridged platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Telegram,
    Discord,
}

impl Side {
    /// The platform on the other end of a bridge.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Telegram => Self::Discord,
            Self::Discord => Self::Telegram,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Telegram => "Telegram",
            Self::Discord => "Discord",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of a single relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    TelegramToDiscord,
    DiscordToTelegram,
}

impl Direction {
    /// Direction of a message that originated on `side`.
    pub fn from_source(side: Side) -> Self {
        match side {
            Side::Telegram => Self::TelegramToDiscord,
            Side::Discord => Self::DiscordToTelegram,
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            Self::TelegramToDiscord => Self::DiscordToTelegram,
            Self::DiscordToTelegram => Self::TelegramToDiscord,
        }
    }

    pub fn source(&self) -> Side {
        match self {
            Self::TelegramToDiscord => Side::Telegram,
            Self::DiscordToTelegram => Side::Discord,
        }
    }

    pub fn destination(&self) -> Side {
        self.source().opposite()
    }

    /// Stable short code used by the durable store.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TelegramToDiscord => "t2d",
            Self::DiscordToTelegram => "d2t",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}

/// Formatting or reference annotation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre,
    /// `@username` written in the text.
    Mention,
    /// Mention of a user without a username; the display name is the auxiliary value.
    TextMention,
    Hashtag,
    Url,
    /// Text with a hidden URL; the URL is the auxiliary value.
    TextLink,
    /// Kinds without a Discord counterpart (cashtags, phone numbers, ...).
    Other(String),
}

impl EntityKind {
    /// Map a Telegram Bot API entity type.
    pub fn from_telegram(kind: &str) -> Self {
        match kind {
            "bold" => Self::Bold,
            "italic" => Self::Italic,
            "underline" => Self::Underline,
            "strikethrough" => Self::Strikethrough,
            "spoiler" => Self::Spoiler,
            "code" => Self::Code,
            "pre" => Self::Pre,
            "mention" => Self::Mention,
            "text_mention" => Self::TextMention,
            "hashtag" => Self::Hashtag,
            "url" => Self::Url,
            "text_link" => Self::TextLink,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An (offset, length, kind) annotation over message text.
///
/// Offsets and lengths are UTF-16 code units, as delivered by Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntity {
    pub offset: usize,
    pub length: usize,
    pub kind: EntityKind,
    /// URL for text links, language for pre blocks, display name for text mentions.
    pub auxiliary: Option<String>,
}

impl TextEntity {
    pub fn new(offset: usize, length: usize, kind: EntityKind) -> Self {
        Self {
            offset,
            length,
            kind,
            auxiliary: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: impl Into<String>) -> Self {
        self.auxiliary = Some(auxiliary.into());
        self
    }

    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }
}
