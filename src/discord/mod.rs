//! Discord bot integration.
//!
//! This module provides the Discord side of the relay: gateway events in,
//! message operations out.

pub mod client;
pub mod handler;
pub mod resolver;
pub mod sender;

pub use client::{DiscordBot, DiscordConnection};
pub use handler::BridgeHandler;
pub use resolver::MessageResolver;
pub use sender::DiscordSender;
