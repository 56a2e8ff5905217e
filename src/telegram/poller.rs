//! Telegram long-polling loop.
//!
//! Each update is converted and relayed in its own task so a slow
//! destination never blocks the poll.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bridge::RelayOrchestrator;
use crate::common::messages::{Attachment, InboundMessage, MemberEvent, ReplyRef};
use crate::common::types::Side;
use crate::telegram::api::TelegramApi;
use crate::telegram::types::{Message, Update, User};

/// Seconds Telegram holds a getUpdates request open.
const POLL_TIMEOUT_SECS: u64 = 30;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct TelegramPoller {
    api: Arc<TelegramApi>,
    relay: Arc<RelayOrchestrator>,
    use_first_name: bool,
    shutdown_rx: watch::Receiver<bool>,
}

impl TelegramPoller {
    pub fn new(
        api: Arc<TelegramApi>,
        relay: Arc<RelayOrchestrator>,
        use_first_name: bool,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            api,
            relay,
            use_first_name,
            shutdown_rx,
        }
    }

    pub async fn run(self) {
        /// 1s initial, 1min max, factor 2, with jitter, unlimited retries.
        fn poll_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(1))
                .with_max_delay(MAX_RETRY_DELAY)
                .with_factor(2.0)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let Self {
            api,
            relay,
            use_first_name,
            mut shutdown_rx,
        } = self;

        match api.get_me().await {
            Ok(me) => info!("Telegram bot connected as {}", me.display_name(false)),
            Err(e) => warn!("Failed to identify Telegram bot: {}", e),
        }

        let mut offset: i64 = 0;
        let mut backoff = poll_backoff();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let delay = tokio::select! {
                result = api.get_updates(offset, POLL_TIMEOUT_SECS) => match result {
                    Ok(updates) => {
                        backoff = poll_backoff();
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            let api = Arc::clone(&api);
                            let relay = Arc::clone(&relay);
                            tokio::spawn(async move {
                                handle_update(&api, &relay, use_first_name, update).await;
                            });
                        }
                        None
                    }
                    Err(e) => {
                        let delay = backoff.next().unwrap_or(MAX_RETRY_DELAY);
                        warn!("Telegram poll failed: {}. Retrying in {:.1}s...", e, delay.as_secs_f64());
                        Some(delay)
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    None
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = sleep(delay) => {},
                    _ = shutdown_rx.changed() => {},
                }
            }
        }
        info!("Telegram polling stopped");
    }
}

async fn handle_update(api: &TelegramApi, relay: &RelayOrchestrator, use_first_name: bool, update: Update) {
    let update_id = update.update_id;

    if let Some(message) = update.message.or(update.channel_post) {
        let members = member_events(&message);
        if !members.is_empty() {
            for (user, event) in members {
                let name = user.display_name(use_first_name);
                let outcomes = relay.on_member(Side::Telegram, message.chat.id, &name, event).await;
                debug!(?outcomes, update_id, "Telegram member event handled");
            }
            return;
        }
        let inbound = to_inbound(api, &message, use_first_name).await;
        let outcomes = relay.on_create(Side::Telegram, inbound).await;
        debug!(?outcomes, update_id, "Telegram message handled");
    } else if let Some(message) = update.edited_message.or(update.edited_channel_post) {
        let inbound = to_inbound(api, &message, use_first_name).await;
        let outcomes = relay.on_edit(Side::Telegram, inbound).await;
        debug!(?outcomes, update_id, "Telegram edit handled");
    }
}

/// Join and leave announcements carried by a service message. Bots are skipped.
fn member_events(message: &Message) -> Vec<(&User, MemberEvent)> {
    let joined = message
        .new_chat_members
        .iter()
        .map(|user| (user, MemberEvent::Joined));
    let left = message
        .left_chat_member
        .iter()
        .map(|user| (user, MemberEvent::Left));
    joined.chain(left).filter(|(user, _)| !user.is_bot).collect()
}

async fn to_inbound(api: &TelegramApi, message: &Message, use_first_name: bool) -> InboundMessage {
    let mut inbound = convert(message, use_first_name);

    if let Some((file_id, filename)) = message.file() {
        match api.get_file(file_id).await {
            Ok(file) => match api.file_url(&file) {
                Some(url) => inbound.attachments.push(Attachment::new(url, filename)),
                None => warn!(file_id, "Telegram file has no download path"),
            },
            Err(e) => warn!(file_id, error = %e, "Failed to resolve Telegram file"),
        }
    }
    inbound
}

/// Everything but attachments, which need an API round trip.
fn convert(message: &Message, use_first_name: bool) -> InboundMessage {
    let (text, entities) = message.body();
    let mut inbound = InboundMessage::new(
        message.message_id,
        message.chat.id,
        message.author_name(use_first_name),
        text,
    )
    .with_entities(entities.iter().map(|entity| entity.to_text_entity()).collect());
    inbound.thread_id = message.topic();
    inbound.forwarded_from = message.forward_origin.as_ref().map(|origin| origin.name(use_first_name));

    if let Some(reply) = &message.reply_to_message {
        // Inside a topic, messages reply to the topic's opening message implicitly.
        let topic_root = message.topic() == Some(reply.message_id);
        if !topic_root {
            inbound.reply_to = Some(ReplyRef {
                id: reply.message_id,
                author: reply.author_name(use_first_name),
                text: reply.body().0.to_string(),
            });
        }
    }
    inbound
}
