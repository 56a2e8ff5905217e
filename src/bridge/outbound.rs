//! Outbound platform interface used by the relay orchestrator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::state::Destination;
use crate::common::error::DispatchResult;
use crate::common::messages::Attachment;
use crate::common::types::{MessageId, Side};

/// Per-send options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Native reply target on the destination platform.
    pub reply_to: Option<MessageId>,
    /// Render as an embed description (Discord only).
    pub as_embed: bool,
    /// Embed author line (Discord only).
    pub embed_author: Option<String>,
    /// Files to attach, fetched by URL.
    pub attachments: Vec<Attachment>,
    /// Users the message may ping (Discord only). Nobody else is notified.
    pub mentions: Vec<u64>,
}

impl SendOptions {
    pub fn reply(reply_to: Option<MessageId>) -> Self {
        Self {
            reply_to,
            ..Default::default()
        }
    }
}

/// Sends, edits and deletes messages on one platform.
///
/// Implementations classify failures: a target that no longer exists is
/// `DispatchError::NotFound`, anything the platform refuses is `Rejected`.
#[async_trait]
pub trait PlatformSender: Send + Sync {
    /// Platform this sender talks to.
    fn side(&self) -> Side;

    async fn send_message(
        &self,
        destination: Destination,
        markup: &str,
        options: SendOptions,
    ) -> DispatchResult<MessageId>;

    async fn edit_message(
        &self,
        destination: Destination,
        message_id: MessageId,
        markup: &str,
        as_embed: bool,
    ) -> DispatchResult<()>;

    async fn delete_message(&self, destination: Destination, message_id: MessageId) -> DispatchResult<()>;
}

pub type SharedSender = Arc<dyn PlatformSender>;
