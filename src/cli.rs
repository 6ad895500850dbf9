use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serenity::async_trait;
use std::sync::Arc;

use crate::clients::feed_client::{FeedFetcher, HttpFeedFetcher};
use crate::config::Settings;
use crate::error::SendError;
use crate::runtime;
use crate::service::notification_service::{MessageSender, Notifier};

#[derive(Parser)]
#[command(name = "calendarBot", about = "Announces upcoming calendar events in chat channels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Connect to Discord and start polling (default).
    Run,
    /// Set the calendar feed of a channel.
    Set { channel: String, url: String },
    /// Show the calendar feed of a channel.
    Get { channel: String },
    /// Remove the calendar feed of a channel.
    Clear { channel: String },
    /// List every channel with a calendar.
    List,
    /// Run a single poll cycle and print the announcements instead of sending them.
    PollOnce,
}

/// Prints announcements to stdout.
pub struct StdoutSender;

#[async_trait]
impl MessageSender for StdoutSender {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), SendError> {
        println!("[{}] {}", channel_id, content);
        Ok(())
    }
}

pub async fn execute(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Run => runtime::run_bot(settings).await,
        Commands::Set { channel, url } => {
            runtime::open_registry(&settings)
                .set_calendar(&channel, &url)
                .await
                .context("setting calendar")?;
            println!("Calendar for {} set to {}", channel, url);
            Ok(())
        }
        Commands::Get { channel } => {
            match runtime::open_registry(&settings)
                .get_calendar(&channel)
                .await
                .context("reading calendar")?
            {
                Some(url) => println!("The calendar URL for {} is {}", channel, url),
                None => println!("No calendar set for {}", channel),
            }
            Ok(())
        }
        Commands::Clear { channel } => {
            runtime::open_registry(&settings)
                .clear_calendar(&channel)
                .await
                .context("clearing calendar")?;
            println!("Calendar successfully removed for {}.", channel);
            Ok(())
        }
        Commands::List => {
            let calendars = runtime::open_registry(&settings)
                .list_calendars()
                .await
                .context("listing calendars")?;
            if calendars.is_empty() {
                println!("No calendars registered");
            }
            for calendar in calendars {
                println!(
                    "{}\t{}",
                    calendar.channel_id,
                    calendar.feed_url.as_deref().unwrap_or("<missing>")
                );
            }
            Ok(())
        }
        Commands::PollOnce => {
            let fetcher: Arc<dyn FeedFetcher> = Arc::new(
                HttpFeedFetcher::new(settings.fetch_timeout)
                    .context("building feed HTTP client")?,
            );
            let notifier = Notifier::new(Arc::new(StdoutSender), settings.display_timezone);
            let poller = runtime::build_poller(
                &settings,
                runtime::open_registry(&settings),
                fetcher,
                notifier,
            );
            let report = poller
                .poll_cycle(Utc::now())
                .await
                .context("poll cycle aborted")?;
            println!(
                "Polled {} channel(s): {} announcement(s), {} failed feed(s)",
                report.channels, report.notified, report.failed_fetches
            );
            Ok(())
        }
    }
}
