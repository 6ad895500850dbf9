use chrono::{DateTime, Utc};

use crate::models::event::{RawEvent, ResolvedOccurrence};

/// Next instant of `event` strictly after `now`.
pub fn next_occurrence(event: &RawEvent, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match event {
        RawEvent::OneOff { start, .. } => (*start > now).then_some(*start),
        RawEvent::Recurring { rule, .. } => rule.first_after(now),
    }
}

/// Resolves one feed against a single `now` captured by the caller. Events
/// that have already started or whose rule has run out are dropped.
pub fn resolve(channel_id: &str, events: &[RawEvent], now: DateTime<Utc>) -> Vec<ResolvedOccurrence> {
    events
        .iter()
        .filter_map(|event| {
            next_occurrence(event, now).map(|occurs_at| ResolvedOccurrence {
                channel_id: channel_id.to_string(),
                title: event.title().to_string(),
                occurs_at,
            })
        })
        .collect()
}
