use serde::{Deserialize, Serialize};

/// A channel tracked by the registry together with the feed it polls.
///
/// `feed_url` is `None` when the channel is still a member of the tracked
/// set but its URL key is gone; such entries are listed but never polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCalendar {
    pub channel_id: String,
    pub feed_url: Option<String>,
}

impl ChannelCalendar {
    pub fn new(channel_id: &str, feed_url: Option<String>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            feed_url,
        }
    }

    /// The URL to poll, if there is a usable one.
    pub fn pollable_url(&self) -> Option<&str> {
        self.feed_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
