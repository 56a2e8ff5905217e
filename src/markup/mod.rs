//! Rich-text translation between Telegram and Discord.
//!
//! Both directions are pure and never fail; anything that cannot be
//! expressed on the other side degrades to literal text.

pub mod entities;
pub mod markdown;

pub use entities::{
    escape_markdown, to_discord_markdown, NameResolver, NoResolver, TranslateOptions, Translated,
    DISCORD_MESSAGE_LIMIT,
};
pub use markdown::{escape_html, to_telegram_html};
