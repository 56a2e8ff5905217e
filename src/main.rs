//! Crossbridge - Telegram-Discord chat bridge
//!
//! Relays messages between Telegram chats and Discord channels, keeping
//! edits, deletions and replies in sync on both sides.

mod bridge;
mod common;
mod config;
mod discord;
mod markup;
mod store;
mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bridge::{BridgeConfig, RelayOrchestrator, RelaySettings, RoutingTable, SharedSender};
use config::{env::get_config_path, load_and_validate};
use discord::{BridgeHandler, DiscordConnection, MessageResolver};
use markup::NameResolver;
use store::open_store;
use telegram::{TelegramApi, TelegramPoller, TelegramSender};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Crossbridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Bridges: {}", config.bridges.len());
    info!("  Message TTL: {}s", config.messages.ttl_seconds);

    let routing = Arc::new(RoutingTable::new(
        config.bridges.iter().map(BridgeConfig::from_mapping).collect(),
    ));
    let store = open_store(&config.messages)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Discord client first: its sender doubles as the name resolver.
    let discord = DiscordConnection::build(config.discord.token.clone()).await?;
    let discord_sender = discord.sender();

    let telegram_api = Arc::new(TelegramApi::new(config.telegram.token.clone())?);
    let telegram_sender: SharedSender = Arc::new(TelegramSender::new(Arc::clone(&telegram_api)));

    let resolver: Arc<dyn NameResolver> = discord_sender.clone();
    let relay = Arc::new(RelayOrchestrator::new(
        Arc::clone(&routing),
        store,
        telegram_sender,
        discord_sender,
        resolver,
        RelaySettings::from_telegram(&config.telegram),
    ));

    let handler = BridgeHandler::new(
        Arc::clone(&relay),
        Arc::clone(&routing),
        MessageResolver::new()?,
        config.discord.use_nickname,
    );
    let discord_bot = discord.into_bot(handler, shutdown_rx.clone());

    info!("Starting Discord bot...");
    let mut discord_task = tokio::spawn(discord_bot.run());

    info!("Starting Telegram polling...");
    let poller = TelegramPoller::new(
        telegram_api,
        relay,
        config.telegram.use_first_name,
        shutdown_rx,
    );
    let mut telegram_task = tokio::spawn(poller.run());

    tokio::select! {
        biased;
        _ = shutdown_signal() => info!("Shutdown signal received - stopping..."),
        _ = &mut discord_task => warn!("Discord task exited"),
        _ = &mut telegram_task => warn!("Telegram task exited"),
    }

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed (tasks already exited): {}", e);
    }
    let timeout = Duration::from_secs(5);
    for (name, task) in [("Discord", discord_task), ("Telegram", telegram_task)] {
        // A handle that already completed in the select must not be polled again.
        if task.is_finished() {
            continue;
        }
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => info!("{} task stopped", name),
            Ok(Err(e)) => warn!("{} task panicked: {}", name, e),
            Err(_) => warn!("{} task shutdown timed out", name),
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
