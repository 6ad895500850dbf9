use serde::{Deserialize, Serialize};
use serenity::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// One open session against the key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StoreError>;
    async fn remove_from_set(&self, set_key: &str, member: &str) -> Result<(), StoreError>;
    async fn members_of(&self, set_key: &str) -> Result<BTreeSet<String>, StoreError>;
}

/// Hands out sessions. Callers hold a session only for the duration of one
/// operation; dropping it releases it.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn KeyValueStore>, StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    values: BTreeMap<String, String>,
    #[serde(default)]
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl StoreDocument {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn delete(&mut self, key: &str) {
        self.values.remove(key);
        self.sets.remove(key);
    }

    fn add_to_set(&mut self, set_key: &str, member: &str) {
        self.sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    fn remove_from_set(&mut self, set_key: &str, member: &str) {
        if let Some(members) = self.sets.get_mut(set_key) {
            members.remove(member);
            if members.is_empty() {
                self.sets.remove(set_key);
            }
        }
    }

    fn members_of(&self, set_key: &str) -> BTreeSet<String> {
        self.sets.get(set_key).cloned().unwrap_or_default()
    }
}

/// Process-local store. Used by tests and dry runs of the CLI.
#[derive(Clone, Default)]
pub struct MemoryStore {
    doc: Arc<Mutex<StoreDocument>>,
    open_sessions: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions that have been handed out and not dropped yet.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

struct SessionLease(Arc<AtomicUsize>);

impl SessionLease {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemorySession {
    doc: Arc<Mutex<StoreDocument>>,
    _lease: SessionLease,
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn KeyValueStore>, StoreError> {
        Ok(Box::new(MemorySession {
            doc: self.doc.clone(),
            _lease: SessionLease::acquire(&self.open_sessions),
        }))
    }
}

#[async_trait]
impl KeyValueStore for MemorySession {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.doc.lock().await.get(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.doc.lock().await.set(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.doc.lock().await.delete(key);
        Ok(())
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.doc.lock().await.add_to_set(set_key, member);
        Ok(())
    }

    async fn remove_from_set(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.doc.lock().await.remove_from_set(set_key, member);
        Ok(())
    }

    async fn members_of(&self, set_key: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.doc.lock().await.members_of(set_key))
    }
}

/// Store persisted as a single JSON document, rewritten after every write.
/// A missing file reads as an empty store.
#[derive(Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreConnector for JsonFileStore {
    async fn connect(&self) -> Result<Box<dyn KeyValueStore>, StoreError> {
        Ok(Box::new(JsonFileSession {
            path: self.path.clone(),
            lock: self.lock.clone(),
        }))
    }
}

struct JsonFileSession {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileSession {
    async fn load(&self) -> Result<StoreDocument, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T + Send) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(f(&doc))
    }

    async fn write(&self, f: impl FnOnce(&mut StoreDocument) + Send) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        f(&mut doc);
        self.save(&doc).await
    }
}

#[async_trait]
impl KeyValueStore for JsonFileSession {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|doc| doc.get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(|doc| doc.set(key, value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.write(|doc| doc.delete(key)).await
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.write(|doc| doc.add_to_set(set_key, member)).await
    }

    async fn remove_from_set(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.write(|doc| doc.remove_from_set(set_key, member)).await
    }

    async fn members_of(&self, set_key: &str) -> Result<BTreeSet<String>, StoreError> {
        self.read(|doc| doc.members_of(set_key)).await
    }
}
