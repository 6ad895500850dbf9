use std::sync::Arc;

use crate::clients::store::StoreConnector;
use crate::error::StoreError;
use crate::models::calendar::ChannelCalendar;

/// Channel -> feed URL mapping kept in the key/value store.
///
/// Keys are `<prefix>:calendars` (set of tracked channels) and
/// `<prefix>:<channel>:calendar` (the URL). Both writes of `set_calendar`
/// and `clear_calendar` are issued independently; there is no rollback when
/// only one of them lands.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn StoreConnector>,
    prefix: String,
}

impl Registry {
    pub fn new(store: Arc<dyn StoreConnector>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    fn calendars_key(&self) -> String {
        format!("{}:calendars", self.prefix)
    }

    fn calendar_key(&self, channel_id: &str) -> String {
        format!("{}:{}:calendar", self.prefix, channel_id)
    }

    /// Both writes are attempted even when the first fails; the first error wins.
    pub async fn set_calendar(&self, channel_id: &str, url: &str) -> Result<(), StoreError> {
        let session = self.store.connect().await?;
        let url_write = session.set(&self.calendar_key(channel_id), url).await;
        let member_write = session.add_to_set(&self.calendars_key(), channel_id).await;
        url_write.and(member_write)
    }

    pub async fn clear_calendar(&self, channel_id: &str) -> Result<(), StoreError> {
        let session = self.store.connect().await?;
        let member_removal = session.remove_from_set(&self.calendars_key(), channel_id).await;
        let url_removal = session.delete(&self.calendar_key(channel_id)).await;
        member_removal.and(url_removal)
    }

    pub async fn get_calendar(&self, channel_id: &str) -> Result<Option<String>, StoreError> {
        let session = self.store.connect().await?;
        let url = session.get(&self.calendar_key(channel_id)).await?;
        Ok(url.filter(|u| !u.trim().is_empty()))
    }

    /// Every tracked channel, sorted by id. Channels whose URL key is missing
    /// are included with `feed_url: None`.
    pub async fn list_calendars(&self) -> Result<Vec<ChannelCalendar>, StoreError> {
        let session = self.store.connect().await?;
        let channels = session.members_of(&self.calendars_key()).await?;
        let mut calendars = Vec::with_capacity(channels.len());
        for channel_id in channels {
            let url = session.get(&self.calendar_key(&channel_id)).await?;
            if url.is_none() {
                tracing::warn!("Channel {} is tracked but has no calendar URL", channel_id);
            }
            calendars.push(ChannelCalendar::new(&channel_id, url));
        }
        Ok(calendars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::store::{KeyValueStore, MemoryStore};
    use serenity::async_trait;
    use std::collections::BTreeSet;

    fn registry(store: &MemoryStore) -> Registry {
        Registry::new(Arc::new(store.clone()), "calbot")
    }

    /// Plain keys work; every set mutation fails.
    struct SetWritesFail {
        inner: MemoryStore,
    }

    struct SetWritesFailSession {
        inner: Box<dyn KeyValueStore>,
    }

    #[async_trait]
    impl StoreConnector for SetWritesFail {
        async fn connect(&self) -> Result<Box<dyn KeyValueStore>, StoreError> {
            Ok(Box::new(SetWritesFailSession {
                inner: self.inner.connect().await?,
            }))
        }
    }

    #[async_trait]
    impl KeyValueStore for SetWritesFailSession {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
        async fn add_to_set(&self, _set_key: &str, _member: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("set write refused".to_string()))
        }
        async fn remove_from_set(&self, _set_key: &str, _member: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("set write refused".to_string()))
        }
        async fn members_of(&self, set_key: &str) -> Result<BTreeSet<String>, StoreError> {
            self.inner.members_of(set_key).await
        }
    }

    #[tokio::test]
    async fn set_get_list_clear_round_trip() {
        let store = MemoryStore::new();
        let registry = registry(&store);

        registry.set_calendar("#c", "https://u").await.unwrap();
        assert_eq!(registry.get_calendar("#c").await.unwrap(), Some("https://u".to_string()));
        assert_eq!(
            registry.list_calendars().await.unwrap(),
            vec![ChannelCalendar::new("#c", Some("https://u".to_string()))]
        );

        registry.clear_calendar("#c").await.unwrap();
        assert_eq!(registry.get_calendar("#c").await.unwrap(), None);
        assert!(registry.list_calendars().await.unwrap().is_empty());
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn resetting_overwrites_without_duplicating_membership() {
        let store = MemoryStore::new();
        let registry = registry(&store);

        registry.set_calendar("#c", "https://old").await.unwrap();
        registry.set_calendar("#c", "https://new").await.unwrap();

        let listed = registry.list_calendars().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].feed_url.as_deref(), Some("https://new"));
    }

    #[tokio::test]
    async fn clearing_twice_is_quiet() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        registry.set_calendar("#c", "https://u").await.unwrap();
        registry.set_calendar("#d", "https://d").await.unwrap();

        registry.clear_calendar("#c").await.unwrap();
        registry.clear_calendar("#c").await.unwrap();

        let listed = registry.list_calendars().await.unwrap();
        assert_eq!(listed, vec![ChannelCalendar::new("#d", Some("https://d".to_string()))]);
    }

    #[tokio::test]
    async fn tracked_channel_without_url_is_listed_as_missing() {
        let store = MemoryStore::new();
        let session = store.connect().await.unwrap();
        session.add_to_set("calbot:calendars", "#orphan").await.unwrap();
        drop(session);

        let listed = registry(&store).list_calendars().await.unwrap();
        assert_eq!(listed, vec![ChannelCalendar::new("#orphan", None)]);
        assert_eq!(listed[0].pollable_url(), None);
    }

    #[tokio::test]
    async fn keys_are_namespaced_by_prefix() {
        let store = MemoryStore::new();
        registry(&store).set_calendar("#c", "https://u").await.unwrap();

        let session = store.connect().await.unwrap();
        assert_eq!(
            session.get("calbot:#c:calendar").await.unwrap(),
            Some("https://u".to_string())
        );
        assert!(session.members_of("calbot:calendars").await.unwrap().contains("#c"));
    }

    #[tokio::test]
    async fn failed_membership_write_still_stores_the_url() {
        let store = MemoryStore::new();
        let registry = Registry::new(
            Arc::new(SetWritesFail {
                inner: store.clone(),
            }),
            "calbot",
        );

        let result = registry.set_calendar("#c", "https://u").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let session = store.connect().await.unwrap();
        assert_eq!(
            session.get("calbot:#c:calendar").await.unwrap(),
            Some("https://u".to_string())
        );
        assert!(session.members_of("calbot:calendars").await.unwrap().is_empty());
        drop(session);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn failed_membership_removal_still_deletes_the_url() {
        let store = MemoryStore::new();
        registry(&store).set_calendar("#c", "https://u").await.unwrap();
        let failing = Registry::new(
            Arc::new(SetWritesFail {
                inner: store.clone(),
            }),
            "calbot",
        );

        let result = failing.clear_calendar("#c").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let session = store.connect().await.unwrap();
        assert_eq!(session.get("calbot:#c:calendar").await.unwrap(), None);
        assert!(session.members_of("calbot:calendars").await.unwrap().contains("#c"));
        drop(session);

        // The channel is still tracked but is no longer polled.
        let listed = registry(&store).list_calendars().await.unwrap();
        assert_eq!(listed, vec![ChannelCalendar::new("#c", None)]);
    }
}
