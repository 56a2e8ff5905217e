//! Discord bot client.
//!
//! Serenity events are forwarded over a channel and processed in one loop,
//! so the gateway connection can be rebuilt without losing the handler.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::all::{
    ChannelId, Context, EventHandler, GatewayIntents, GuildId, Member, Message, MessageId, MessageUpdateEvent, Ready,
    User,
};
use serenity::async_trait;
use serenity::Client;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::common::messages::MemberEvent;
use crate::discord::handler::BridgeHandler;
use crate::discord::sender::DiscordSender;

/// Longest wait between reconnection attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Message created.
    Message {
        context: Context,
        message: Message,
    },
    /// Message edited.
    MessageUpdate {
        context: Context,
        event: MessageUpdateEvent,
    },
    /// Message deleted.
    MessageDelete {
        context: Context,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
        message_id: MessageId,
    },
    /// Member joined a guild.
    MemberAdded {
        context: Context,
        member: Member,
    },
    /// Member left a guild.
    MemberRemoved {
        context: Context,
        guild_id: GuildId,
        user: User,
    },
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }

    fn forward(&self, event: DiscordBotEvent) {
        if let Err(error) = self.discord_events_tx.send(event) {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        self.forward(DiscordBotEvent::Ready(ready));
    }

    async fn message(&self, context: Context, message: Message) {
        self.forward(DiscordBotEvent::Message { context, message });
    }

    async fn message_update(
        &self,
        context: Context,
        _old_if_available: Option<Message>,
        _new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        self.forward(DiscordBotEvent::MessageUpdate { context, event });
    }

    async fn message_delete(
        &self,
        context: Context,
        channel_id: ChannelId,
        message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        self.forward(DiscordBotEvent::MessageDelete {
            context,
            channel_id,
            guild_id,
            message_id,
        });
    }

    async fn guild_member_addition(&self, context: Context, member: Member) {
        self.forward(DiscordBotEvent::MemberAdded { context, member });
    }

    async fn guild_member_removal(
        &self,
        context: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        self.forward(DiscordBotEvent::MemberRemoved {
            context,
            guild_id,
            user,
        });
    }
}

async fn build_client(token: &str, discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let events = DiscordBotEvents::new(discord_events_tx);
    let client = Client::builder(token, intents).event_handler(events).await?;
    Ok(client)
}

/// Discord client before the relay is wired to it.
///
/// The sender exists as soon as the client is built, so the orchestrator
/// can be created before the gateway connects.
pub struct DiscordConnection {
    client: Client,
    token: String,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    sender: Arc<DiscordSender>,
}

impl DiscordConnection {
    pub async fn build(token: String) -> anyhow::Result<Self> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();
        let client = build_client(&token, discord_events_tx.clone()).await?;
        let sender = Arc::new(DiscordSender::new(client.http.clone(), client.cache.clone()));

        Ok(Self {
            client,
            token,
            discord_events_tx,
            discord_events_rx,
            sender,
        })
    }

    pub fn sender(&self) -> Arc<DiscordSender> {
        Arc::clone(&self.sender)
    }

    pub fn into_bot(self, handler: BridgeHandler, shutdown_rx: watch::Receiver<bool>) -> DiscordBot {
        DiscordBot {
            client: Some(self.client),
            token: self.token,
            handler,
            sender: self.sender,
            discord_events_rx: self.discord_events_rx,
            discord_events_tx: self.discord_events_tx,
            shutdown_rx,
        }
    }
}

pub struct DiscordBot {
    client: Option<Client>,
    token: String,
    handler: BridgeHandler,
    sender: Arc<DiscordSender>,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DiscordBot {
    pub async fn run(mut self) {
        let shard_manager = self.client.as_ref().map(|c| c.shard_manager.clone());
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            _ = Self::run_connection(&mut self.client, &self.token, &self.sender, &self.discord_events_tx) => {},
            _ = Self::process_events(&mut self.discord_events_rx, &self.handler, &mut self.shutdown_rx) => {},
            _ = async {
                loop {
                    if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                if let Some(ref manager) = shard_manager {
                    info!("Initiating graceful Discord shutdown...");
                    manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                }
            } => {}
        }
        info!("Discord task ended");
    }

    async fn run_connection(
        client: &mut Option<Client>,
        token: &str,
        sender: &DiscordSender,
        discord_events_tx: &mpsc::UnboundedSender<DiscordBotEvent>,
    ) {
        /// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
        fn discord_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(MAX_RECONNECT_DELAY)
                .with_factor(1.1)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => match build_client(token, discord_events_tx.clone()).await {
                    Ok(client) => {
                        sender.attach(client.http.clone(), client.cache.clone());
                        backoff = discord_backoff();
                        client
                    }
                    Err(e) => {
                        error!("Failed to rebuild Discord client: {}", e);
                        let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                        warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                        sleep(delay).await;
                        continue;
                    }
                },
            };

            match client.start().await {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                    warn!("Discord disconnected. Reconnecting in {:.1}s...", delay.as_secs_f64());
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    async fn process_events(
        discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
        handler: &BridgeHandler,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = discord_events_rx.recv() => {
                    let Some(event) = event else {
                        debug!("Discord events channel closed.");
                        break;
                    };
                    match event {
                        DiscordBotEvent::Ready(ready) => {
                            info!("Discord bot connected as {}", ready.user.name);
                        }
                        DiscordBotEvent::Message { context, message } => {
                            handler.handle_message(&context, message);
                        }
                        DiscordBotEvent::MessageUpdate { context, event } => {
                            handler.handle_update(&context, event);
                        }
                        DiscordBotEvent::MessageDelete { context, channel_id, guild_id, message_id } => {
                            handler.handle_delete(&context, channel_id, guild_id, message_id);
                        }
                        DiscordBotEvent::MemberAdded { context, member } => {
                            handler.handle_member(&context, member.guild_id, &member.user, MemberEvent::Joined);
                        }
                        DiscordBotEvent::MemberRemoved { context, guild_id, user } => {
                            handler.handle_member(&context, guild_id, &user, MemberEvent::Left);
                        }
                        DiscordBotEvent::Disconnected => {
                            debug!("Discord gateway disconnected");
                        }
                    }
                }

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event processing");
                        break;
                    }
                }
            }
        }
    }
}
