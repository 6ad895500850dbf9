use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clients::feed_client::FeedFetcher;
use crate::error::CalendarError;
use crate::service::notification_service::{MessageSender, Notifier};
use crate::service::registry::Registry;
use crate::service::resolver;

pub const COMMANDS: [&str; 3] = ["cal", "delcal", "upcoming"];

pub fn usage(command: &str) -> Option<&'static str> {
    match command {
        "cal" => Some("Get the channel's calendar. Pass a URL to set the calendar for the channel."),
        "delcal" => Some("Remove the calendar for the channel."),
        "upcoming" => Some("Print out the next event for the channel."),
        _ => None,
    }
}

/// Chat commands of the bot. Each call replies in the channel and returns
/// the completion signal; a failed reply does not fail the command.
#[derive(Clone)]
pub struct CalendarCommands {
    registry: Registry,
    fetcher: Arc<dyn FeedFetcher>,
    sender: Arc<dyn MessageSender>,
    notifier: Notifier,
}

impl CalendarCommands {
    pub fn new(
        registry: Registry,
        fetcher: Arc<dyn FeedFetcher>,
        sender: Arc<dyn MessageSender>,
        notifier: Notifier,
    ) -> Self {
        Self {
            registry,
            fetcher,
            sender,
            notifier,
        }
    }

    async fn reply(&self, channel_id: &str, content: &str) {
        if let Err(err) = self.sender.send_message(channel_id, content).await {
            tracing::warn!("Reply to {} failed: {}", channel_id, err);
        }
    }

    /// Sets the channel's calendar when `argument` holds a URL, reports it otherwise.
    pub async fn cal(&self, channel_id: &str, argument: Option<&str>) -> Result<(), CalendarError> {
        let url = argument.map(str::trim).filter(|a| !a.is_empty());

        if let Some(url) = url {
            return match self.registry.set_calendar(channel_id, url).await {
                Ok(()) => {
                    tracing::info!("Calendar for {} set to {}", channel_id, url);
                    self.reply(channel_id, &format!("Calendar for {} set to {}", channel_id, url))
                        .await;
                    Ok(())
                }
                Err(err) => {
                    self.reply(
                        channel_id,
                        &format!("Failed to update the calendar for {}.", channel_id),
                    )
                    .await;
                    Err(err.into())
                }
            };
        }

        match self.registry.get_calendar(channel_id).await {
            Ok(Some(url)) => {
                self.reply(
                    channel_id,
                    &format!("The calendar URL for {} is {}", channel_id, url),
                )
                .await;
                Ok(())
            }
            Ok(None) => {
                self.reply(channel_id, &format!("No calendar set for {}", channel_id))
                    .await;
                Ok(())
            }
            Err(err) => {
                self.reply(
                    channel_id,
                    &format!("Failed to read the calendar for {}.", channel_id),
                )
                .await;
                Err(err.into())
            }
        }
    }

    pub async fn delcal(&self, channel_id: &str) -> Result<(), CalendarError> {
        let cleared = self.registry.clear_calendar(channel_id).await;
        if let Err(err) = &cleared {
            tracing::warn!("Clearing calendar for {} failed: {}", channel_id, err);
        }
        self.reply(
            channel_id,
            &format!("Calendar successfully removed for {}.", channel_id),
        )
        .await;
        cleared.map_err(CalendarError::from)
    }

    pub async fn upcoming(&self, channel_id: &str) -> Result<(), CalendarError> {
        self.upcoming_at(channel_id, Utc::now()).await
    }

    /// Reports the earliest occurrence of the channel's feed after `now`.
    pub async fn upcoming_at(
        &self,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CalendarError> {
        let url = match self.registry.get_calendar(channel_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                self.reply(channel_id, &format!("No calendar set for {}", channel_id))
                    .await;
                return Ok(());
            }
            Err(err) => {
                self.reply(
                    channel_id,
                    &format!("Failed to read the calendar for {}.", channel_id),
                )
                .await;
                return Err(err.into());
            }
        };

        let events = match self.fetcher.fetch(&url).await {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!("Fetching {} for {} failed: {}", url, channel_id, err);
                self.reply(
                    channel_id,
                    &format!("Could not load the calendar for {}.", channel_id),
                )
                .await;
                return Err(err.into());
            }
        };

        let next = resolver::resolve(channel_id, &events, now)
            .into_iter()
            .min_by_key(|occurrence| occurrence.occurs_at);
        match next {
            Some(occurrence) => {
                let body = self.notifier.render(&occurrence, now);
                self.reply(channel_id, &format!("Next event for {}: {}", channel_id, body))
                    .await;
            }
            None => {
                self.reply(channel_id, &format!("No upcoming events for {}", channel_id))
                    .await;
            }
        }
        Ok(())
    }
}
