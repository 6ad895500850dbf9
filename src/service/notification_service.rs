use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;
use serenity::async_trait;
use std::sync::Arc;

use crate::error::SendError;
use crate::models::event::ResolvedOccurrence;

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), SendError>;
}

/// Formats occurrences and posts one message per call. Send failures are
/// returned to the caller and never retried here.
#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn MessageSender>,
    display_tz: Tz,
}

impl Notifier {
    pub fn new(sender: Arc<dyn MessageSender>, display_tz: Tz) -> Self {
        Self { sender, display_tz }
    }

    pub fn render(&self, occurrence: &ResolvedOccurrence, now: DateTime<Utc>) -> String {
        format!(
            "{} starts {} ({})",
            occurrence.title,
            relative_phrase(occurrence.occurs_at, now),
            absolute_timestamp(occurrence.occurs_at, &self.display_tz)
        )
    }

    pub async fn notify(
        &self,
        channel_id: &str,
        occurrence: &ResolvedOccurrence,
        now: DateTime<Utc>,
    ) -> Result<(), SendError> {
        let body = self.render(occurrence, now);
        self.sender.send_message(channel_id, &body).await
    }
}

/// "in 3 days", "in an hour", "5 minutes ago".
pub fn relative_phrase(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let millis = (target - now).num_milliseconds();
    let span = humanize_span(millis.unsigned_abs() as f64 / 1000.0);
    if millis >= 0 {
        format!("in {}", span)
    } else {
        format!("{} ago", span)
    }
}

fn humanize_span(total_seconds: f64) -> String {
    let seconds = total_seconds.round();
    let minutes = (total_seconds / 60.0).round();
    let hours = (total_seconds / 3_600.0).round();
    let days = (total_seconds / 86_400.0).round();
    let months = (total_seconds / 86_400.0 * 4_800.0 / 146_097.0).round();
    let years = (total_seconds / 86_400.0 * 400.0 / 146_097.0).round();

    if seconds <= 44.0 {
        "a few seconds".to_string()
    } else if seconds < 45.0 {
        format!("{} seconds", seconds)
    } else if minutes <= 1.0 {
        "a minute".to_string()
    } else if minutes < 45.0 {
        format!("{} minutes", minutes)
    } else if hours <= 1.0 {
        "an hour".to_string()
    } else if hours < 22.0 {
        format!("{} hours", hours)
    } else if days <= 1.0 {
        "a day".to_string()
    } else if days < 26.0 {
        format!("{} days", days)
    } else if months <= 1.0 {
        "a month".to_string()
    } else if months < 11.0 {
        format!("{} months", months)
    } else if years <= 1.0 {
        "a year".to_string()
    } else {
        format!("{} years", years)
    }
}

/// "October 18th 2026, 4:00 pm +00:00" in the given zone.
pub fn absolute_timestamp(target: DateTime<Utc>, tz: &Tz) -> String {
    let local = tz.from_utc_datetime(&target.naive_utc());
    let day = local.day();
    format!(
        "{} {}{} {}",
        local.format("%B"),
        day,
        ordinal_suffix(day),
        local.format("%Y, %-I:%M %P %:z")
    )
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}
