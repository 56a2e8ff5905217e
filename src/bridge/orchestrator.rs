//! Relay orchestrator.
//!
//! Turns inbound platform events into sends, edits and deletes on the other
//! platform. Every route a message touches moves through
//! `Received -> Routed -> Translated -> Dispatched -> Correlated`, or stops
//! early as `Ignored` / `Failed`; each entry point returns the terminal
//! state of every route.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, trace, warn};

use crate::bridge::format::{
    chunk_limit, chunk_markup, forward_header, member_notice, name_header, reply_quote, truncate_for_log,
};
use crate::bridge::outbound::{SendOptions, SharedSender};
use crate::bridge::routing::SharedRoutingTable;
use crate::bridge::state::{BridgeConfig, Destination};
use crate::common::error::DispatchError;
use crate::common::messages::{InboundMessage, MemberEvent};
use crate::common::types::{ChatId, Direction, MessageId, Side};
use crate::config::TelegramConfig;
use crate::markup::{to_discord_markdown, to_telegram_html, NameResolver, TranslateOptions};
use crate::store::SharedCorrelationStore;

/// Command answered in place with the chat's ids.
pub const CHATINFO_COMMAND: &str = "/chatinfo";

/// Body of an edit that deletes the relayed copies.
pub const DELETE_MARKER: &str = ".";

const NOT_BRIDGED_NOTICE: &str =
    "This chat is not bridged. Send /chatinfo to get the ids needed to configure a bridge.";

/// Why a route stopped without dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotBridged,
    DirectionDisabled,
    FlagDisabled,
    Empty,
    Command,
    CorrelationMiss,
}

/// Per-route progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Received,
    Routed,
    Translated,
    Dispatched,
    Correlated,
    Ignored(IgnoreReason),
    Failed,
}

/// Terminal state of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Bridge name; `None` when the event matched no bridge.
    pub bridge: Option<String>,
    pub state: RelayState,
}

impl RouteOutcome {
    fn new(bridge: &BridgeConfig, state: RelayState) -> Self {
        Self {
            bridge: Some(bridge.name.clone()),
            state,
        }
    }

    fn unrouted(reason: IgnoreReason) -> Self {
        Self {
            bridge: None,
            state: RelayState::Ignored(reason),
        }
    }
}

/// Behavior switches that are not per bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaySettings {
    /// Drop Telegram messages starting with `/`.
    pub ignore_commands: bool,
    /// Never send the "not bridged" notice.
    pub suppress_private_notice: bool,
}

impl RelaySettings {
    pub fn from_telegram(config: &TelegramConfig) -> Self {
        Self {
            ignore_commands: config.ignore_commands,
            suppress_private_notice: config.suppress_private_notice,
        }
    }
}

/// Rendered message ready for dispatch.
struct Composed {
    markup: String,
    use_embed: bool,
    embed_author: Option<String>,
    reply_to: Option<MessageId>,
    mentions: Vec<u64>,
}

/// Relays events between the two platforms.
pub struct RelayOrchestrator {
    routing: SharedRoutingTable,
    store: SharedCorrelationStore,
    telegram: SharedSender,
    discord: SharedSender,
    resolver: Arc<dyn NameResolver>,
    settings: RelaySettings,
    /// Telegram chats already told they are not bridged.
    notified: Mutex<HashSet<ChatId>>,
}

impl RelayOrchestrator {
    pub fn new(
        routing: SharedRoutingTable,
        store: SharedCorrelationStore,
        telegram: SharedSender,
        discord: SharedSender,
        resolver: Arc<dyn NameResolver>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            routing,
            store,
            telegram,
            discord,
            resolver,
            settings,
            notified: Mutex::new(HashSet::new()),
        }
    }

    fn sender(&self, side: Side) -> &SharedSender {
        match side {
            Side::Telegram => &self.telegram,
            Side::Discord => &self.discord,
        }
    }

    /// Relay a newly created message.
    pub async fn on_create(&self, side: Side, message: InboundMessage) -> Vec<RouteOutcome> {
        trace!(%side, id = message.id, state = ?RelayState::Received, "Message received");
        let text = message.text.trim();

        if text == CHATINFO_COMMAND {
            self.answer_chatinfo(side, &message).await;
            return vec![RouteOutcome::unrouted(IgnoreReason::Command)];
        }
        if side == Side::Telegram && self.settings.ignore_commands && text.starts_with('/') {
            debug!(chat = message.chat_id, "Ignoring command");
            return vec![RouteOutcome::unrouted(IgnoreReason::Command)];
        }

        let routes = self.routing.by_side(side, message.chat_id, message.thread_id);
        if routes.is_empty() {
            debug!(%side, chat = message.chat_id, thread = ?message.thread_id, "Message from unbridged chat");
            self.notify_unbridged(side, message.chat_id, message.thread_id).await;
            return vec![RouteOutcome::unrouted(IgnoreReason::NotBridged)];
        }

        let direction = Direction::from_source(side);
        let mut outcomes = Vec::with_capacity(routes.len());
        for bridge in routes {
            let state = if !bridge.direction.allows(direction) {
                RelayState::Ignored(IgnoreReason::DirectionDisabled)
            } else if message.is_empty() {
                RelayState::Ignored(IgnoreReason::Empty)
            } else {
                self.relay_create(&bridge, direction, &message).await
            };
            outcomes.push(RouteOutcome::new(&bridge, state));
        }
        outcomes
    }

    async fn relay_create(&self, bridge: &BridgeConfig, direction: Direction, message: &InboundMessage) -> RelayState {
        trace!(bridge = %bridge.name, state = ?RelayState::Routed, "Route matched");
        let target = direction.destination();
        let destination = bridge.destination(target);
        let sender = self.sender(target);

        let composed = self.compose(bridge, direction, message).await;
        trace!(bridge = %bridge.name, state = ?RelayState::Translated, "Message translated");

        let has_body = !message.text.trim().is_empty();
        let mut dispatched: Vec<MessageId> = Vec::new();

        for (i, attachment) in message.attachments.iter().enumerate() {
            // Attachment-only messages carry the header as caption.
            let caption = if i == 0 && !has_body { composed.markup.as_str() } else { "" };
            let options = SendOptions {
                reply_to: composed.reply_to,
                as_embed: false,
                embed_author: None,
                attachments: vec![attachment.clone()],
                mentions: Vec::new(),
            };
            match sender.send_message(destination, caption, options).await {
                Ok(id) => dispatched.push(id),
                Err(e) => {
                    self.record(bridge, direction, message.id, &dispatched).await;
                    return self.dispatch_failed(bridge, &attachment.url, &e, dispatched.is_empty());
                }
            }
        }

        if has_body {
            let limit = chunk_limit(target, composed.use_embed);
            for (i, chunk) in chunk_markup(&composed.markup, limit).iter().enumerate() {
                let options = SendOptions {
                    reply_to: if i == 0 { composed.reply_to } else { None },
                    as_embed: composed.use_embed,
                    embed_author: if i == 0 { composed.embed_author.clone() } else { None },
                    attachments: Vec::new(),
                    mentions: composed.mentions.clone(),
                };
                match sender.send_message(destination, chunk, options).await {
                    Ok(id) => dispatched.push(id),
                    Err(e) => {
                        self.record(bridge, direction, message.id, &dispatched).await;
                        return self.dispatch_failed(bridge, chunk, &e, dispatched.is_empty());
                    }
                }
            }
        }
        trace!(
            bridge = %bridge.name,
            target = %sender.side(),
            state = ?RelayState::Dispatched,
            count = dispatched.len(),
            "Message dispatched"
        );

        if self.record(bridge, direction, message.id, &dispatched).await {
            RelayState::Correlated
        } else {
            RelayState::Dispatched
        }
    }

    /// Store every dispatched id under the source id. Returns false on a store error.
    async fn record(&self, bridge: &BridgeConfig, direction: Direction, source: MessageId, ids: &[MessageId]) -> bool {
        for &id in ids {
            if let Err(e) = self.store.insert(&bridge.name, direction, source, id).await {
                warn!(bridge = %bridge.name, source, destination = id, error = %e, "Failed to record correlation");
                return false;
            }
        }
        true
    }

    fn dispatch_failed(&self, bridge: &BridgeConfig, content: &str, error: &DispatchError, nothing_sent: bool) -> RelayState {
        warn!(
            bridge = %bridge.name,
            content = %truncate_for_log(content),
            error = %error,
            "Failed to relay message"
        );
        if nothing_sent {
            RelayState::Failed
        } else {
            RelayState::Dispatched
        }
    }

    /// Translate and attach headers for the destination side.
    async fn compose(&self, bridge: &BridgeConfig, direction: Direction, message: &InboundMessage) -> Composed {
        let target = direction.destination();
        let (body, use_embed, mentions) = match direction {
            Direction::TelegramToDiscord => {
                let translated = to_discord_markdown(
                    &message.text,
                    &message.entities,
                    self.resolver.as_ref(),
                    TranslateOptions {
                        embeds: bridge.discord.embeds,
                    },
                );
                (translated.markup, translated.use_embed, translated.mentions)
            }
            Direction::DiscordToTelegram => (to_telegram_html(&message.text), false, Vec::new()),
        };

        let mut header = String::new();
        let mut embed_author = None;
        if bridge.flags(direction.source()).send_usernames {
            if use_embed {
                embed_author = Some(message.author.clone());
            } else {
                header.push_str(&name_header(target, &message.author));
            }
        }
        if let Some(from) = &message.forwarded_from {
            header.push_str(&forward_header(target, from));
        }

        let mut reply_to = None;
        if let Some(reply) = &message.reply_to {
            reply_to = self.reply_anchor(bridge, direction, reply.id).await;
            if reply_to.is_none() {
                header.push_str(&reply_quote(target, reply));
            }
        }

        Composed {
            markup: header + &body,
            use_embed,
            embed_author,
            reply_to,
            mentions,
        }
    }

    /// Destination-side id a reply should point at.
    ///
    /// The replied-to message is either a relayed copy (its original lives on
    /// the destination side) or an original that was relayed.
    async fn reply_anchor(&self, bridge: &BridgeConfig, direction: Direction, reply_id: MessageId) -> Option<MessageId> {
        match self.store.get_reverse(&bridge.name, direction.reverse(), reply_id).await {
            Ok(Some(original)) => return Some(original),
            Ok(None) => {}
            Err(e) => warn!(bridge = %bridge.name, error = %e, "Reply lookup failed"),
        }
        match self.store.get(&bridge.name, direction, reply_id).await {
            Ok(ids) => ids.first().copied(),
            Err(e) => {
                warn!(bridge = %bridge.name, error = %e, "Reply lookup failed");
                None
            }
        }
    }

    /// Propagate an edit to every relayed copy.
    pub async fn on_edit(&self, side: Side, message: InboundMessage) -> Vec<RouteOutcome> {
        let routes = self.routing.by_side(side, message.chat_id, message.thread_id);
        if routes.is_empty() {
            debug!(%side, chat = message.chat_id, "Edit in unbridged chat");
            return vec![RouteOutcome::unrouted(IgnoreReason::NotBridged)];
        }

        let direction = Direction::from_source(side);
        let mut outcomes = Vec::with_capacity(routes.len());
        for bridge in routes {
            let state = if !bridge.direction.allows(direction) {
                RelayState::Ignored(IgnoreReason::DirectionDisabled)
            } else if bridge.flags(side).cross_delete && message.text.trim() == DELETE_MARKER {
                self.delete_relayed(&bridge, side, message.id).await
            } else {
                self.relay_edit(&bridge, direction, &message).await
            };
            outcomes.push(RouteOutcome::new(&bridge, state));
        }
        outcomes
    }

    async fn relay_edit(&self, bridge: &BridgeConfig, direction: Direction, message: &InboundMessage) -> RelayState {
        let ids = match self.store.get(&bridge.name, direction, message.id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(bridge = %bridge.name, error = %e, "Correlation lookup failed");
                return RelayState::Failed;
            }
        };
        if ids.is_empty() {
            debug!(bridge = %bridge.name, source = message.id, "Edit of unrelayed message");
            return RelayState::Ignored(IgnoreReason::CorrelationMiss);
        }

        // Attachment copies come first and keep their content.
        let text_ids = ids.get(message.attachments.len()..).unwrap_or_default();
        if text_ids.is_empty() || message.text.trim().is_empty() {
            return RelayState::Ignored(IgnoreReason::Empty);
        }

        let target = direction.destination();
        let destination = bridge.destination(target);
        let composed = self.compose(bridge, direction, message).await;
        let chunks = chunk_markup(&composed.markup, chunk_limit(target, composed.use_embed));
        let sender = self.sender(target);

        for (chunk, &id) in chunks.iter().zip(text_ids) {
            match sender.edit_message(destination, id, chunk, composed.use_embed).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(bridge = %bridge.name, message = id, "Edited copy no longer exists");
                }
                Err(e) => return self.dispatch_failed(bridge, chunk, &e, true),
            }
        }
        if chunks.len() > text_ids.len() {
            debug!(
                bridge = %bridge.name,
                chunks = chunks.len(),
                copies = text_ids.len(),
                "Edited text no longer fits the relayed copies"
            );
        }
        RelayState::Dispatched
    }

    /// Propagate a deletion.
    pub async fn on_delete(
        &self,
        side: Side,
        chat_id: ChatId,
        thread_id: Option<ChatId>,
        message_id: MessageId,
    ) -> Vec<RouteOutcome> {
        let routes = self.routing.by_side(side, chat_id, thread_id);
        if routes.is_empty() {
            return vec![RouteOutcome::unrouted(IgnoreReason::NotBridged)];
        }

        let mut outcomes = Vec::with_capacity(routes.len());
        for bridge in routes {
            let state = self.delete_relayed(&bridge, side, message_id).await;
            outcomes.push(RouteOutcome::new(&bridge, state));
        }
        outcomes
    }

    async fn delete_relayed(&self, bridge: &BridgeConfig, side: Side, message_id: MessageId) -> RelayState {
        if !bridge.flags(side).cross_delete {
            return RelayState::Ignored(IgnoreReason::FlagDisabled);
        }
        let direction = Direction::from_source(side);

        let copies = match self.store.remove(&bridge.name, direction, message_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(bridge = %bridge.name, error = %e, "Correlation lookup failed");
                return RelayState::Failed;
            }
        };
        if !copies.is_empty() {
            let target = side.opposite();
            return self.delete_all(bridge, target, &copies).await;
        }

        // The deleted message may itself be a relayed copy.
        let reverse = direction.reverse();
        match self.store.get_reverse(&bridge.name, reverse, message_id).await {
            Ok(Some(original)) => {
                if let Err(e) = self.store.remove(&bridge.name, reverse, original).await {
                    warn!(bridge = %bridge.name, error = %e, "Failed to drop correlation");
                }
                self.delete_all(bridge, side.opposite(), &[original]).await
            }
            Ok(None) => {
                debug!(bridge = %bridge.name, message = message_id, "Delete of unrelayed message");
                RelayState::Ignored(IgnoreReason::CorrelationMiss)
            }
            Err(e) => {
                warn!(bridge = %bridge.name, error = %e, "Correlation lookup failed");
                RelayState::Failed
            }
        }
    }

    async fn delete_all(&self, bridge: &BridgeConfig, target: Side, ids: &[MessageId]) -> RelayState {
        let destination = bridge.destination(target);
        let sender = self.sender(target);
        let mut state = RelayState::Dispatched;

        for &id in ids {
            match sender.delete_message(destination, id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(bridge = %bridge.name, message = id, "Message already deleted");
                }
                Err(e) => {
                    warn!(bridge = %bridge.name, message = id, error = %e, "Failed to delete message");
                    state = RelayState::Failed;
                }
            }
        }
        if state == RelayState::Dispatched {
            info!(bridge = %bridge.name, %target, count = ids.len(), "Deleted relayed messages");
        }
        state
    }

    /// Announce a join or leave on the other side.
    pub async fn on_member(&self, side: Side, chat_id: ChatId, name: &str, event: MemberEvent) -> Vec<RouteOutcome> {
        let routes = self.routing.by_side(side, chat_id, None);
        if routes.is_empty() {
            return vec![RouteOutcome::unrouted(IgnoreReason::NotBridged)];
        }

        let direction = Direction::from_source(side);
        let target = side.opposite();
        let mut outcomes = Vec::with_capacity(routes.len());
        for bridge in routes {
            let flags = bridge.flags(side);
            let enabled = match event {
                MemberEvent::Joined => flags.relay_join,
                MemberEvent::Left => flags.relay_leave,
            };
            let state = if !bridge.direction.allows(direction) {
                RelayState::Ignored(IgnoreReason::DirectionDisabled)
            } else if !enabled {
                RelayState::Ignored(IgnoreReason::FlagDisabled)
            } else {
                let notice = member_notice(target, name, event);
                match self
                    .sender(target)
                    .send_message(bridge.destination(target), &notice, SendOptions::default())
                    .await
                {
                    Ok(_) => RelayState::Dispatched,
                    Err(e) => self.dispatch_failed(&bridge, &notice, &e, true),
                }
            };
            outcomes.push(RouteOutcome::new(&bridge, state));
        }
        outcomes
    }

    async fn answer_chatinfo(&self, side: Side, message: &InboundMessage) {
        let text = match message.thread_id {
            Some(thread) => format!("chat_id: {}\nthread_id: {}", message.chat_id, thread),
            None => format!("chat_id: {}", message.chat_id),
        };
        // Discord threads are channels of their own.
        let destination = match (side, message.thread_id) {
            (Side::Discord, Some(thread)) => Destination::new(thread),
            _ => Destination {
                chat_id: message.chat_id,
                thread_id: message.thread_id,
            },
        };
        if let Err(e) = self
            .sender(side)
            .send_message(destination, &text, SendOptions::reply(Some(message.id)))
            .await
        {
            warn!(%side, chat = message.chat_id, error = %e, "Failed to answer chatinfo");
        }
    }

    async fn notify_unbridged(&self, side: Side, chat_id: ChatId, thread_id: Option<ChatId>) {
        if side != Side::Telegram || self.settings.suppress_private_notice {
            return;
        }
        let first = self
            .notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat_id);
        if !first {
            return;
        }
        let destination = Destination { chat_id, thread_id };
        if let Err(e) = self
            .telegram
            .send_message(destination, NOT_BRIDGED_NOTICE, SendOptions::default())
            .await
        {
            warn!(chat = chat_id, error = %e, "Failed to send not-bridged notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::bridge::outbound::PlatformSender;
    use crate::bridge::routing::RoutingTable;
    use crate::bridge::state::{BridgeDirection, EmbedPolicy, ThreadRoute};
    use crate::common::error::DispatchResult;
    use crate::common::messages::{Attachment, ReplyRef};
    use crate::common::types::{EntityKind, TextEntity};
    use crate::markup::NoResolver;
    use crate::store::{CorrelationStore, MemoryCorrelationStore};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Send {
            dest: Destination,
            markup: String,
            options: SendOptions,
        },
        Edit {
            dest: Destination,
            id: MessageId,
            markup: String,
        },
        Delete {
            dest: Destination,
            id: MessageId,
        },
    }

    struct RecordingSender {
        side: Side,
        next_id: AtomicI64,
        calls: Mutex<Vec<Call>>,
        fail_sends: bool,
        /// Attachment URLs the platform refuses.
        rejected_urls: Vec<String>,
        missing: Vec<MessageId>,
    }

    impl RecordingSender {
        fn new(side: Side, first_id: MessageId) -> Self {
            Self {
                side,
                next_id: AtomicI64::new(first_id),
                calls: Mutex::new(Vec::new()),
                fail_sends: false,
                rejected_urls: Vec::new(),
                missing: Vec::new(),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn sent(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Send { markup, .. } => Some(markup),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl PlatformSender for RecordingSender {
        fn side(&self) -> Side {
            self.side
        }

        async fn send_message(&self, dest: Destination, markup: &str, options: SendOptions) -> DispatchResult<MessageId> {
            if self.fail_sends {
                return Err(DispatchError::rejected("forbidden"));
            }
            if options.attachments.iter().any(|a| self.rejected_urls.contains(&a.url)) {
                return Err(DispatchError::rejected("file too large"));
            }
            self.calls.lock().unwrap().push(Call::Send {
                dest,
                markup: markup.to_string(),
                options,
            });
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn edit_message(&self, dest: Destination, id: MessageId, markup: &str, _as_embed: bool) -> DispatchResult<()> {
            self.calls.lock().unwrap().push(Call::Edit {
                dest,
                id,
                markup: markup.to_string(),
            });
            Ok(())
        }

        async fn delete_message(&self, dest: Destination, id: MessageId) -> DispatchResult<()> {
            self.calls.lock().unwrap().push(Call::Delete { dest, id });
            if self.missing.contains(&id) {
                return Err(DispatchError::not_found("message to delete not found"));
            }
            Ok(())
        }
    }

    struct Harness {
        relay: RelayOrchestrator,
        store: Arc<MemoryCorrelationStore>,
        telegram: Arc<RecordingSender>,
        discord: Arc<RecordingSender>,
    }

    fn harness_with(
        bridges: Vec<BridgeConfig>,
        telegram: RecordingSender,
        discord: RecordingSender,
        settings: RelaySettings,
    ) -> Harness {
        let store = Arc::new(MemoryCorrelationStore::new(Duration::from_secs(3600)));
        let telegram = Arc::new(telegram);
        let discord = Arc::new(discord);
        let relay = RelayOrchestrator::new(
            Arc::new(RoutingTable::new(bridges)),
            store.clone(),
            telegram.clone(),
            discord.clone(),
            Arc::new(NoResolver),
            settings,
        );
        Harness {
            relay,
            store,
            telegram,
            discord,
        }
    }

    fn harness(bridges: Vec<BridgeConfig>) -> Harness {
        harness_with(
            bridges,
            RecordingSender::new(Side::Telegram, 1000),
            RecordingSender::new(Side::Discord, 5000),
            RelaySettings::default(),
        )
    }

    fn general() -> BridgeConfig {
        BridgeConfig::new("general", -100, 500)
    }

    fn states(outcomes: &[RouteOutcome]) -> Vec<RelayState> {
        outcomes.iter().map(|o| o.state).collect()
    }

    #[tokio::test]
    async fn test_create_relays_and_correlates() {
        let h = harness(vec![general()]);
        let message = InboundMessage::new(1, -100, "alice", "Hello world")
            .with_entities(vec![TextEntity::new(0, 5, EntityKind::Bold)]);

        let outcomes = h.relay.on_create(Side::Telegram, message).await;

        assert_eq!(states(&outcomes), vec![RelayState::Correlated]);
        assert_eq!(outcomes[0].bridge.as_deref(), Some("general"));
        assert_eq!(h.discord.sent(), vec!["**alice**\n**Hello** world"]);
        assert_eq!(
            h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap(),
            vec![5000]
        );
    }

    #[tokio::test]
    async fn test_discord_to_telegram_uses_html() {
        let mut bridge = general();
        bridge.discord.flags.send_usernames = false;
        let h = harness(vec![bridge]);

        h.relay
            .on_create(Side::Discord, InboundMessage::new(77, 500, "bob", "**hi** <there>"))
            .await;

        assert_eq!(h.telegram.sent(), vec!["<b>hi</b> &lt;there&gt;"]);
        assert_eq!(
            h.store.get("general", Direction::DiscordToTelegram, 77).await.unwrap(),
            vec![1000]
        );
    }

    #[tokio::test]
    async fn test_direction_filter() {
        let mut one_way = general();
        one_way.direction = BridgeDirection::TelegramToDiscord;
        let h = harness(vec![one_way]);

        let outcomes = h
            .relay
            .on_create(Side::Discord, InboundMessage::new(1, 500, "bob", "hello"))
            .await;

        assert_eq!(
            states(&outcomes),
            vec![RelayState::Ignored(IgnoreReason::DirectionDisabled)]
        );
        assert!(h.telegram.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_to_every_bridge() {
        let h = harness(vec![general(), BridgeConfig::new("mirror", -100, 600)]);

        let outcomes = h
            .relay
            .on_create(Side::Telegram, InboundMessage::new(1, -100, "alice", "hi"))
            .await;

        assert_eq!(states(&outcomes), vec![RelayState::Correlated, RelayState::Correlated]);
        let channels: Vec<ChatId> = h
            .discord
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { dest, .. } => Some(dest.chat_id),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec![500, 600]);
    }

    #[tokio::test]
    async fn test_long_message_is_chunked_and_fully_correlated() {
        let mut bridge = general();
        bridge.telegram.flags.send_usernames = false;
        bridge.discord.embeds = EmbedPolicy::Never;
        let h = harness(vec![bridge]);
        let text = "word ".repeat(900);

        h.relay
            .on_create(Side::Telegram, InboundMessage::new(1, -100, "alice", text.clone()))
            .await;

        let sent = h.discord.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent.concat(), text);
        assert_eq!(
            h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap(),
            vec![5000, 5001, 5002]
        );
    }

    #[tokio::test]
    async fn test_embed_carries_author() {
        let mut bridge = general();
        bridge.discord.embeds = EmbedPolicy::Always;
        let h = harness(vec![bridge]);

        h.relay
            .on_create(Side::Telegram, InboundMessage::new(1, -100, "alice", "hi"))
            .await;

        match &h.discord.calls()[0] {
            Call::Send { markup, options, .. } => {
                assert_eq!(markup, "hi");
                assert!(options.as_embed);
                assert_eq!(options.embed_author.as_deref(), Some("alice"));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attachments_are_sent_first() {
        let h = harness(vec![general()]);
        let message = InboundMessage::new(1, -100, "alice", "look")
            .with_attachment(Attachment::new("https://files/cat.png", "cat.png"));

        h.relay.on_create(Side::Telegram, message).await;

        let calls = h.discord.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            Call::Send { markup, options, .. } => {
                assert!(markup.is_empty());
                assert_eq!(options.attachments.len(), 1);
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(
            h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap(),
            vec![5000, 5001]
        );
    }

    #[tokio::test]
    async fn test_reply_uses_native_anchor() {
        let h = harness(vec![general()]);
        // Discord message 900 was relayed to Telegram as 40.
        h.store
            .insert("general", Direction::DiscordToTelegram, 900, 40)
            .await
            .unwrap();
        let message = InboundMessage::new(2, -100, "alice", "agreed").with_reply(ReplyRef {
            id: 40,
            author: "bob".into(),
            text: "original".into(),
        });

        h.relay.on_create(Side::Telegram, message).await;

        match &h.discord.calls()[0] {
            Call::Send { markup, options, .. } => {
                assert_eq!(options.reply_to, Some(900));
                assert!(!markup.contains("original"));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_to_relayed_original() {
        let h = harness(vec![general()]);
        h.store
            .insert("general", Direction::TelegramToDiscord, 10, 5100)
            .await
            .unwrap();
        let message = InboundMessage::new(11, -100, "alice", "me again").with_reply(ReplyRef {
            id: 10,
            ..Default::default()
        });

        h.relay.on_create(Side::Telegram, message).await;

        match &h.discord.calls()[0] {
            Call::Send { options, .. } => assert_eq!(options.reply_to, Some(5100)),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_without_anchor_quotes_inline() {
        let mut bridge = general();
        bridge.telegram.flags.send_usernames = false;
        let h = harness(vec![bridge]);
        let message = InboundMessage::new(2, -100, "alice", "agreed").with_reply(ReplyRef {
            id: 3,
            author: "bob".into(),
            text: "first line\nsecond line".into(),
        });

        h.relay.on_create(Side::Telegram, message).await;

        assert_eq!(h.discord.sent(), vec!["> **bob**: first line\nagreed"]);
    }

    #[tokio::test]
    async fn test_forward_header() {
        let mut bridge = general();
        bridge.discord.flags.send_usernames = false;
        let h = harness(vec![bridge]);
        let mut message = InboundMessage::new(1, 500, "bob", "news");
        message.forwarded_from = Some("Channel".into());

        h.relay.on_create(Side::Discord, message).await;

        assert_eq!(h.telegram.sent(), vec!["<i>Forwarded from Channel</i>\nnews"]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_reported() {
        let mut discord = RecordingSender::new(Side::Discord, 5000);
        discord.fail_sends = true;
        let h = harness_with(
            vec![general()],
            RecordingSender::new(Side::Telegram, 1000),
            discord,
            RelaySettings::default(),
        );

        let outcomes = h
            .relay
            .on_create(Side::Telegram, InboundMessage::new(1, -100, "alice", "hi"))
            .await;

        assert_eq!(states(&outcomes), vec![RelayState::Failed]);
        assert!(h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_attachment_failure_keeps_sent_copies_correlated() {
        let mut discord = RecordingSender::new(Side::Discord, 5000);
        discord.rejected_urls.push("https://files/huge.zip".into());
        let h = harness_with(
            vec![general()],
            RecordingSender::new(Side::Telegram, 1000),
            discord,
            RelaySettings::default(),
        );
        let message = InboundMessage::new(1, -100, "alice", "two files")
            .with_attachment(Attachment::new("https://files/cat.png", "cat.png"))
            .with_attachment(Attachment::new("https://files/huge.zip", "huge.zip"));

        let outcomes = h.relay.on_create(Side::Telegram, message).await;

        assert_eq!(states(&outcomes), vec![RelayState::Dispatched]);
        assert_eq!(
            h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap(),
            vec![5000]
        );

        let outcomes = h.relay.on_delete(Side::Telegram, -100, None, 1).await;
        assert_eq!(states(&outcomes), vec![RelayState::Dispatched]);
        assert!(h.discord.calls().contains(&Call::Delete {
            dest: Destination::new(500),
            id: 5000,
        }));
    }

    struct OneUser;

    impl NameResolver for OneUser {
        fn find_user_by_display_name(&self, name: &str) -> Option<u64> {
            (name == "alice").then_some(111)
        }

        fn find_channel_by_name(&self, _name: &str) -> Option<u64> {
            None
        }
    }

    #[tokio::test]
    async fn test_only_resolved_mentions_may_ping() {
        let discord = Arc::new(RecordingSender::new(Side::Discord, 5000));
        let relay = RelayOrchestrator::new(
            Arc::new(RoutingTable::new(vec![general()])),
            Arc::new(MemoryCorrelationStore::new(Duration::from_secs(3600))),
            Arc::new(RecordingSender::new(Side::Telegram, 1000)),
            discord.clone(),
            Arc::new(OneUser),
            RelaySettings::default(),
        );
        let message = InboundMessage::new(1, -100, "bob", "@alice @everyone <@999>")
            .with_entities(vec![TextEntity::new(0, 6, EntityKind::Mention)]);

        relay.on_create(Side::Telegram, message).await;

        match &discord.calls()[0] {
            Call::Send { markup, options, .. } => {
                assert!(markup.ends_with("<@111> @\u{200B}everyone \\<@999>"), "{:?}", markup);
                assert_eq!(options.mentions, vec![111]);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edit_updates_copies_in_order() {
        let mut bridge = general();
        bridge.telegram.flags.send_usernames = false;
        let h = harness(vec![bridge]);
        h.store.insert("general", Direction::TelegramToDiscord, 1, 5000).await.unwrap();
        h.store.insert("general", Direction::TelegramToDiscord, 1, 5001).await.unwrap();

        let outcomes = h
            .relay
            .on_edit(Side::Telegram, InboundMessage::new(1, -100, "alice", "fixed"))
            .await;

        assert_eq!(states(&outcomes), vec![RelayState::Dispatched]);
        assert_eq!(
            h.discord.calls(),
            vec![Call::Edit {
                dest: Destination::new(500),
                id: 5000,
                markup: "fixed".into(),
            }]
        );
        assert_eq!(
            h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap(),
            vec![5000, 5001]
        );
    }

    #[tokio::test]
    async fn test_edit_without_correlation_is_ignored() {
        let h = harness(vec![general()]);
        let outcomes = h
            .relay
            .on_edit(Side::Telegram, InboundMessage::new(1, -100, "alice", "fixed"))
            .await;

        assert_eq!(
            states(&outcomes),
            vec![RelayState::Ignored(IgnoreReason::CorrelationMiss)]
        );
        assert!(h.discord.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dot_edit_deletes_copies() {
        let h = harness(vec![general()]);
        h.store.insert("general", Direction::TelegramToDiscord, 1, 5000).await.unwrap();

        h.relay
            .on_edit(Side::Telegram, InboundMessage::new(1, -100, "alice", "."))
            .await;

        assert_eq!(
            h.discord.calls(),
            vec![Call::Delete {
                dest: Destination::new(500),
                id: 5000
            }]
        );
        assert!(h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dot_edit_without_cross_delete_is_plain_edit() {
        let mut bridge = general();
        bridge.telegram.flags.cross_delete = false;
        bridge.telegram.flags.send_usernames = false;
        let h = harness(vec![bridge]);
        h.store.insert("general", Direction::TelegramToDiscord, 1, 5000).await.unwrap();

        h.relay
            .on_edit(Side::Telegram, InboundMessage::new(1, -100, "alice", "."))
            .await;

        assert!(matches!(h.discord.calls()[0], Call::Edit { id: 5000, .. }));
    }

    #[tokio::test]
    async fn test_delete_without_correlation_makes_no_calls() {
        let h = harness(vec![general()]);

        let outcomes = h.relay.on_delete(Side::Discord, 500, None, 42).await;

        assert_eq!(
            states(&outcomes),
            vec![RelayState::Ignored(IgnoreReason::CorrelationMiss)]
        );
        assert!(h.telegram.calls().is_empty());
        assert!(h.discord.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_consumes_every_copy() {
        let h = harness(vec![general()]);
        h.store.insert("general", Direction::DiscordToTelegram, 77, 1000).await.unwrap();
        h.store.insert("general", Direction::DiscordToTelegram, 77, 1001).await.unwrap();

        let outcomes = h.relay.on_delete(Side::Discord, 500, None, 77).await;

        assert_eq!(states(&outcomes), vec![RelayState::Dispatched]);
        let deleted: Vec<MessageId> = h
            .telegram
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec![1000, 1001]);
        assert!(h.store.get("general", Direction::DiscordToTelegram, 77).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_copy_removes_original() {
        let h = harness(vec![general()]);
        // Telegram message 1 was relayed to Discord as 5000; 5000 gets deleted.
        h.store.insert("general", Direction::TelegramToDiscord, 1, 5000).await.unwrap();

        h.relay.on_delete(Side::Discord, 500, None, 5000).await;

        assert_eq!(
            h.telegram.calls(),
            vec![Call::Delete {
                dest: Destination::new(-100),
                id: 1
            }]
        );
        assert!(h.store.get("general", Direction::TelegramToDiscord, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_respects_cross_delete_flag() {
        let mut bridge = general();
        bridge.discord.flags.cross_delete = false;
        let h = harness(vec![bridge]);
        h.store.insert("general", Direction::DiscordToTelegram, 77, 1000).await.unwrap();

        let outcomes = h.relay.on_delete(Side::Discord, 500, None, 77).await;

        assert_eq!(states(&outcomes), vec![RelayState::Ignored(IgnoreReason::FlagDisabled)]);
        assert!(h.telegram.calls().is_empty());
        assert_eq!(
            h.store.get("general", Direction::DiscordToTelegram, 77).await.unwrap(),
            vec![1000]
        );
    }

    #[tokio::test]
    async fn test_already_deleted_is_swallowed() {
        let mut telegram = RecordingSender::new(Side::Telegram, 1000);
        telegram.missing = vec![1000];
        let h = harness_with(
            vec![general()],
            telegram,
            RecordingSender::new(Side::Discord, 5000),
            RelaySettings::default(),
        );
        h.store.insert("general", Direction::DiscordToTelegram, 77, 1000).await.unwrap();
        h.store.insert("general", Direction::DiscordToTelegram, 77, 1001).await.unwrap();

        let outcomes = h.relay.on_delete(Side::Discord, 500, None, 77).await;

        assert_eq!(states(&outcomes), vec![RelayState::Dispatched]);
        assert_eq!(h.telegram.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_member_events_follow_flags() {
        let mut bridge = general();
        bridge.telegram.flags.relay_leave = false;
        let h = harness(vec![bridge]);

        let joined = h.relay.on_member(Side::Telegram, -100, "carol", MemberEvent::Joined).await;
        let left = h.relay.on_member(Side::Telegram, -100, "carol", MemberEvent::Left).await;

        assert_eq!(states(&joined), vec![RelayState::Dispatched]);
        assert_eq!(states(&left), vec![RelayState::Ignored(IgnoreReason::FlagDisabled)]);
        assert_eq!(h.discord.sent(), vec!["**carol** joined the chat"]);
    }

    #[tokio::test]
    async fn test_unbridged_chat_gets_one_notice() {
        let h = harness(vec![general()]);

        for id in 1..=3 {
            let outcomes = h
                .relay
                .on_create(Side::Telegram, InboundMessage::new(id, -999, "zed", "hello?"))
                .await;
            assert_eq!(states(&outcomes), vec![RelayState::Ignored(IgnoreReason::NotBridged)]);
        }

        assert_eq!(h.telegram.sent(), vec![NOT_BRIDGED_NOTICE]);
    }

    #[tokio::test]
    async fn test_notice_can_be_suppressed() {
        let h = harness_with(
            vec![general()],
            RecordingSender::new(Side::Telegram, 1000),
            RecordingSender::new(Side::Discord, 5000),
            RelaySettings {
                suppress_private_notice: true,
                ..RelaySettings::default()
            },
        );

        h.relay
            .on_create(Side::Telegram, InboundMessage::new(1, -999, "zed", "hello?"))
            .await;

        assert!(h.telegram.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chatinfo_answers_in_place() {
        let h = harness(vec![general()]);

        let outcomes = h
            .relay
            .on_create(
                Side::Telegram,
                InboundMessage::new(9, -100, "alice", "/chatinfo").with_thread(7),
            )
            .await;

        assert_eq!(states(&outcomes), vec![RelayState::Ignored(IgnoreReason::Command)]);
        assert_eq!(h.telegram.sent(), vec!["chat_id: -100\nthread_id: 7"]);
        assert!(h.discord.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ignore_commands() {
        let h = harness_with(
            vec![general()],
            RecordingSender::new(Side::Telegram, 1000),
            RecordingSender::new(Side::Discord, 5000),
            RelaySettings {
                ignore_commands: true,
                ..RelaySettings::default()
            },
        );

        let outcomes = h
            .relay
            .on_create(Side::Telegram, InboundMessage::new(1, -100, "alice", "/start"))
            .await;

        assert_eq!(states(&outcomes), vec![RelayState::Ignored(IgnoreReason::Command)]);
        assert!(h.discord.calls().is_empty());
    }

    #[tokio::test]
    async fn test_thread_route_targets_thread() {
        let mut bridge = general();
        bridge.threads.push(ThreadRoute {
            telegram_thread_id: 7,
            discord_thread_id: 900,
        });
        let h = harness(vec![bridge]);

        h.relay
            .on_create(
                Side::Discord,
                InboundMessage::new(1, 500, "bob", "in thread").with_thread(900),
            )
            .await;

        match &h.telegram.calls()[0] {
            Call::Send { dest, .. } => assert_eq!(
                *dest,
                Destination {
                    chat_id: -100,
                    thread_id: Some(7)
                }
            ),
            other => panic!("unexpected call {:?}", other),
        }
    }
}
