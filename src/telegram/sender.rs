//! Outbound Telegram operations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::outbound::{PlatformSender, SendOptions};
use crate::bridge::state::Destination;
use crate::common::error::DispatchResult;
use crate::common::types::{MessageId, Side};
use crate::telegram::api::TelegramApi;

/// Telegram side of the relay. Markup is Telegram HTML.
pub struct TelegramSender {
    api: Arc<TelegramApi>,
}

impl TelegramSender {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PlatformSender for TelegramSender {
    fn side(&self) -> Side {
        Side::Telegram
    }

    /// Attachments go out as documents; the markup becomes the caption of the first.
    async fn send_message(
        &self,
        destination: Destination,
        markup: &str,
        options: SendOptions,
    ) -> DispatchResult<MessageId> {
        let message = match options.attachments.first() {
            Some(attachment) => {
                self.api
                    .send_document(
                        destination.chat_id,
                        destination.thread_id,
                        &attachment.url,
                        markup,
                        options.reply_to,
                    )
                    .await?
            }
            None => {
                self.api
                    .send_message(destination.chat_id, destination.thread_id, markup, options.reply_to)
                    .await?
            }
        };
        Ok(message.message_id)
    }

    async fn edit_message(
        &self,
        destination: Destination,
        message_id: MessageId,
        markup: &str,
        _as_embed: bool,
    ) -> DispatchResult<()> {
        self.api.edit_message_text(destination.chat_id, message_id, markup).await
    }

    async fn delete_message(&self, destination: Destination, message_id: MessageId) -> DispatchResult<()> {
        self.api.delete_message(destination.chat_id, message_id).await
    }
}
