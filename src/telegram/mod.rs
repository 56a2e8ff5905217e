//! Telegram Bot API integration.
//!
//! ## Module Structure
//!
//! - `types`: Bot API payloads (`Update`, `Message`, entities)
//! - `api`: HTTP client (`TelegramApi`)
//! - `sender`: `PlatformSender` for the Telegram side
//! - `poller`: long-polling loop feeding the relay

pub mod api;
pub mod poller;
pub mod sender;
pub mod types;

pub use api::TelegramApi;
pub use poller::TelegramPoller;
pub use sender::TelegramSender;
