use std::sync::Arc;

use calendarBot::clients::feed_client::FeedFetcher;
use calendarBot::clients::store::{KeyValueStore, MemoryStore, StoreConnector};
use calendarBot::error::{CalendarError, FetchError, SendError, StoreError};
use calendarBot::models::event::RawEvent;
use calendarBot::service::command_service::{CalendarCommands, usage};
use calendarBot::service::notification_service::{MessageSender, Notifier};
use calendarBot::service::registry::Registry;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;

struct FixedFetcher {
    events: Option<Vec<RawEvent>>,
}

#[serenity::async_trait]
impl FeedFetcher for FixedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<RawEvent>, FetchError> {
        self.events
            .clone()
            .ok_or_else(|| FetchError::Parse("not a calendar".to_string()))
    }
}

#[derive(Default)]
struct MockSender {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

#[serenity::async_trait]
impl MessageSender for MockSender {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), SendError> {
        let mut sent = self.sent.lock().await;
        sent.push((channel_id.to_string(), content.to_string()));
        if self.fail {
            return Err(SendError("gateway closed".to_string()));
        }
        Ok(())
    }
}

impl MockSender {
    async fn last(&self) -> Option<String> {
        self.sent.lock().await.last().map(|(_, body)| body.clone())
    }
}

struct UnavailableStore;

#[serenity::async_trait]
impl StoreConnector for UnavailableStore {
    async fn connect(&self) -> Result<Box<dyn KeyValueStore>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 15, 0, 0).unwrap()
}

fn commands_with(
    store: Arc<dyn StoreConnector>,
    events: Option<Vec<RawEvent>>,
    sender: Arc<MockSender>,
) -> CalendarCommands {
    CalendarCommands::new(
        Registry::new(store, "calbot"),
        Arc::new(FixedFetcher { events }),
        sender.clone(),
        Notifier::new(sender, chrono_tz::Tz::UTC),
    )
}

#[tokio::test]
async fn cal_without_argument_reports_missing_then_set_calendar() {
    let sender = Arc::new(MockSender::default());
    let commands = commands_with(Arc::new(MemoryStore::new()), None, sender.clone());

    commands.cal("#x", Some("")).await.unwrap();
    assert_eq!(sender.last().await.as_deref(), Some("No calendar set for #x"));

    commands.cal("#x", Some("http://u")).await.unwrap();
    assert_eq!(sender.last().await.as_deref(), Some("Calendar for #x set to http://u"));

    commands.cal("#x", None).await.unwrap();
    assert_eq!(
        sender.last().await.as_deref(),
        Some("The calendar URL for #x is http://u")
    );
}

#[tokio::test]
async fn delcal_always_reports_removal() {
    let store = MemoryStore::new();
    let sender = Arc::new(MockSender::default());
    let commands = commands_with(Arc::new(store.clone()), None, sender.clone());

    commands.cal("#x", Some("http://u")).await.unwrap();
    commands.delcal("#x").await.unwrap();
    commands.delcal("#x").await.unwrap();

    let sent = sender.sent.lock().await;
    assert_eq!(sent[1].1, "Calendar successfully removed for #x.");
    assert_eq!(sent[2].1, "Calendar successfully removed for #x.");
    drop(sent);

    commands.cal("#x", None).await.unwrap();
    assert_eq!(sender.last().await.as_deref(), Some("No calendar set for #x"));
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn store_failures_fail_the_completion_but_still_reply() {
    let sender = Arc::new(MockSender::default());
    let commands = commands_with(Arc::new(UnavailableStore), None, sender.clone());

    let set = commands.cal("#x", Some("http://u")).await;
    assert!(matches!(set, Err(CalendarError::Store(_))));
    assert_eq!(
        sender.last().await.as_deref(),
        Some("Failed to update the calendar for #x.")
    );

    let get = commands.cal("#x", None).await;
    assert!(matches!(get, Err(CalendarError::Store(_))));

    let cleared = commands.delcal("#x").await;
    assert!(matches!(cleared, Err(CalendarError::Store(_))));
    assert_eq!(
        sender.last().await.as_deref(),
        Some("Calendar successfully removed for #x.")
    );
}

#[tokio::test]
async fn failed_reply_does_not_fail_the_command() {
    let sender = Arc::new(MockSender {
        fail: true,
        ..MockSender::default()
    });
    let commands = commands_with(Arc::new(MemoryStore::new()), None, sender.clone());

    commands.cal("#x", Some("http://u")).await.unwrap();
    assert_eq!(sender.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn upcoming_reports_the_earliest_event() {
    let sender = Arc::new(MockSender::default());
    let events = vec![
        RawEvent::OneOff {
            title: "Planning".to_string(),
            start: now() + Duration::days(3),
        },
        RawEvent::OneOff {
            title: "Standup".to_string(),
            start: now() + Duration::hours(1),
        },
        RawEvent::OneOff {
            title: "Old".to_string(),
            start: now() - Duration::hours(1),
        },
    ];
    let commands = commands_with(Arc::new(MemoryStore::new()), Some(events), sender.clone());

    commands.upcoming_at("#x", now()).await.unwrap();
    assert_eq!(sender.last().await.as_deref(), Some("No calendar set for #x"));

    commands.cal("#x", Some("http://u")).await.unwrap();
    commands.upcoming_at("#x", now()).await.unwrap();
    assert_eq!(
        sender.last().await.as_deref(),
        Some("Next event for #x: Standup starts in an hour (October 18th 2026, 4:00 pm +00:00)")
    );
}

#[tokio::test]
async fn upcoming_handles_empty_and_broken_feeds() {
    let sender = Arc::new(MockSender::default());
    let store = MemoryStore::new();
    let empty = commands_with(Arc::new(store.clone()), Some(Vec::new()), sender.clone());
    empty.cal("#x", Some("http://u")).await.unwrap();

    empty.upcoming_at("#x", now()).await.unwrap();
    assert_eq!(sender.last().await.as_deref(), Some("No upcoming events for #x"));

    let broken = commands_with(Arc::new(store), None, sender.clone());
    let result = broken.upcoming_at("#x", now()).await;
    assert!(matches!(result, Err(CalendarError::Fetch(_))));
    assert_eq!(
        sender.last().await.as_deref(),
        Some("Could not load the calendar for #x.")
    );
}

#[test]
fn usage_is_documented_for_every_command() {
    assert!(usage("cal").unwrap().contains("URL"));
    assert!(usage("delcal").is_some());
    assert!(usage("upcoming").is_some());
    assert!(usage("nope").is_none());
}
