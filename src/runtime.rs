use anyhow::{Context, Result};
use serenity::model::gateway::GatewayIntents;
use std::sync::Arc;

use crate::clients::feed_client::{FeedFetcher, HttpFeedFetcher};
use crate::clients::store::{JsonFileStore, StoreConnector};
use crate::config::Settings;
use crate::handlers::discord::{BotHandler, DiscordSender};
use crate::service::command_service::CalendarCommands;
use crate::service::notification_service::{MessageSender, Notifier};
use crate::service::registry::Registry;
use crate::tasks::poll_loop::{Poller, Scheduler};

pub fn open_registry(settings: &Settings) -> Registry {
    let store: Arc<dyn StoreConnector> = Arc::new(JsonFileStore::new(&settings.store_path));
    Registry::new(store, &settings.key_prefix)
}

pub fn build_poller(
    settings: &Settings,
    registry: Registry,
    fetcher: Arc<dyn FeedFetcher>,
    notifier: Notifier,
) -> Poller {
    Poller::new(registry, fetcher, notifier)
        .with_max_concurrent_fetches(settings.max_concurrent_fetches)
}

/// Runs the Discord bot and the calendar poller until the client stops or
/// Ctrl+C is received.
pub async fn run_bot(settings: Settings) -> Result<()> {
    let token = settings.require_discord_token()?.to_string();

    let registry = open_registry(&settings);
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(
        HttpFeedFetcher::new(settings.fetch_timeout).context("building feed HTTP client")?,
    );
    let sender: Arc<dyn MessageSender> = Arc::new(DiscordSender::new(&token));
    let notifier = Notifier::new(sender.clone(), settings.display_timezone);

    let poller = build_poller(&settings, registry.clone(), fetcher.clone(), notifier.clone());
    let mut scheduler = Scheduler::new(Arc::new(poller), settings.poll_interval);
    scheduler.start();

    let commands = CalendarCommands::new(registry, fetcher, sender, notifier);
    let intents = GatewayIntents::GUILDS;
    let mut client = serenity::Client::builder(&token, intents)
        .event_handler(BotHandler::new(commands))
        .await
        .context("creating Discord client")?;

    tracing::info!("Calendar bot running. Press Ctrl+C to stop.");
    let outcome = tokio::select! {
        result = client.start() => result.context("Discord client error"),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping...");
            signal.context("waiting for shutdown signal")
        }
    };

    scheduler.stop();
    outcome
}
