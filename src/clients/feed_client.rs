use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, CalendarComponent, Component, Event, Property};
use serenity::async_trait;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::event::{RawEvent, RecurrenceRule};

const UNTITLED_EVENT: &str = "Untitled event";

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEvent>, FetchError>;
}

pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("calendarBot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEvent>, FetchError> {
        let url = normalize_feed_url(url)?;
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        parse_feed(&body)
    }
}

/// Accepts http(s) URLs and rewrites `webcal://` subscriptions to https.
pub fn normalize_feed_url(url: &str) -> Result<String, FetchError> {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("webcal://") {
        return Ok(format!("https://{}", &url["webcal://".len()..]));
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(url.to_string());
    }
    Err(FetchError::UnsupportedUrl(url.to_string()))
}

/// Turns an iCalendar document into raw events. Entries without a usable
/// start are dropped instead of failing the feed.
pub fn parse_feed(body: &str) -> Result<Vec<RawEvent>, FetchError> {
    if !body.contains("BEGIN:VCALENDAR") {
        return Err(FetchError::Parse("missing VCALENDAR".to_string()));
    }
    let calendar: Calendar = body
        .parse()
        .map_err(|e| FetchError::Parse(format!("{}", e)))?;

    let mut events = Vec::new();
    for component in &calendar.components {
        if let CalendarComponent::Event(event) = component {
            match event_to_raw(event) {
                Some(raw) => events.push(raw),
                None => tracing::debug!(
                    "Skipping event without a start: {}",
                    event.get_summary().unwrap_or(UNTITLED_EVENT)
                ),
            }
        }
    }
    Ok(events)
}

fn event_to_raw(event: &Event) -> Option<RawEvent> {
    let title = event
        .get_summary()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNTITLED_EVENT)
        .to_string();
    let dtstart = event.properties().get("DTSTART")?;
    let start = parse_date_property(dtstart)?;
    let zone = tzid_of(dtstart).and_then(|name| name.parse::<Tz>().ok());

    let is_override = event.properties().contains_key("RECURRENCE-ID");
    let rrule = event
        .properties()
        .get("RRULE")
        .map(|p| p.value().to_string())
        .filter(|_| !is_override);

    let Some(rrule) = rrule else {
        return Some(RawEvent::OneOff { title, start });
    };

    match RecurrenceRule::new(start, zone, &rrule, &exdates(event)) {
        Ok(rule) => Some(RawEvent::Recurring { title, rule }),
        Err(err) => {
            tracing::warn!("Invalid RRULE on '{}', using DTSTART only: {}", title, err);
            Some(RawEvent::OneOff { title, start })
        }
    }
}

fn exdates(event: &Event) -> Vec<DateTime<Utc>> {
    let single = event.properties().get("EXDATE").into_iter();
    let multi = event
        .multi_properties()
        .get("EXDATE")
        .into_iter()
        .flatten();

    let mut dates = Vec::new();
    for prop in single.chain(multi) {
        let tzid = tzid_of(prop);
        for value in prop.value().split(',') {
            if let Some(date) = parse_date_value(value.trim(), tzid.as_deref()) {
                dates.push(date);
            }
        }
    }
    dates
}

fn tzid_of(prop: &Property) -> Option<String> {
    prop.params()
        .get("TZID")
        .map(|param| param.value().trim_matches('"').to_string())
}

fn parse_date_property(prop: &Property) -> Option<DateTime<Utc>> {
    parse_date_value(prop.value().trim(), tzid_of(prop).as_deref())
}

/// Parses `YYYYMMDD`, `YYYYMMDDTHHMMSSZ` and local `YYYYMMDDTHHMMSS` values.
/// Local values use the TZID when it names a known zone and UTC otherwise.
pub fn parse_date_value(value: &str, tzid: Option<&str>) -> Option<DateTime<Utc>> {
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
    }
    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|d| d.and_utc());
    }

    let local = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    match tzid.and_then(|name| name.parse::<Tz>().ok()) {
        Some(zone) => zone
            .from_local_datetime(&local)
            .earliest()
            .map(|d| d.with_timezone(&Utc)),
        None => Some(Utc.from_utc_datetime(&local)),
    }
}
