//! Best-effort local key/value cache with lazy, read-triggered expiry.
//!
//! Each entry is stored as two keys: the serialized value under `key` and its
//! write time (unix millis) under `key-timestamp`.

use std::{collections::HashMap, fs, path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

pub const CHAT_MESSAGES: &str = "chat_messages";
pub const CURRENT_RECIPE: &str = "current_recipe";
pub const RECIPES_CACHE: &str = "recipes-cache";
pub const COMMUNITY_RECIPES_CACHE: &str = "community-recipes-cache";
pub const LAST_SESSION: &str = "last_session";
pub const USER_STATISTICS: &str = "user_statistics";

const TIMESTAMP_SUFFIX: &str = "-timestamp";

pub fn timestamp_key(key: &str) -> String {
    format!("{key}{TIMESTAMP_SUFFIX}")
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache medium is full")]
    Full,
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The raw storage medium. Strings in, strings out.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A medium that refuses writes once its total size would exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self { entries: RwLock::default(), quota_bytes: Some(quota_bytes) }
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(CacheError::Full);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

/// Keeps every entry in one JSON file, rewritten on each change.
pub struct FileCacheStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileCacheStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        info!("💾 Opened cache file {}", path.display());
        Self { path, entries: RwLock::new(entries) }
    }

    fn flush(&self, entries: &HashMap<String, String>) -> Result<(), CacheError> {
        let content = serde_json::to_string(entries)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            if let Err(e) = self.flush(&entries) {
                warn!("⚠️ Failed to persist removal of cache key '{}': {}", key, e);
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

/// Broadcast on every write or removal. `value` is `None` when the key was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheChange {
    pub key: String,
    pub value: Option<String>,
}

/// Typed view over a [`CacheStore`]. Clones share the medium and the change channel.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn CacheStore>,
    changes: broadcast::Sender<CacheChange>,
    prefix: String,
}

impl LocalCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { store, changes, prefix: String::new() }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// A view whose keys are namespaced under `scope`, sharing medium and notifications.
    pub fn scoped(&self, scope: impl std::fmt::Display) -> Self {
        Self {
            store: self.store.clone(),
            changes: self.changes.clone(),
            prefix: format!("{}{}:", self.prefix, scope),
        }
    }

    /// Full key as stored in the medium.
    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    fn notify(&self, key: String, value: Option<String>) {
        // No receivers is fine.
        let _ = self.changes.send(CacheChange { key, value });
    }

    /// Never fails the caller. A write the medium refuses is logged and dropped.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let full_key = self.key(key);
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("⚠️ Could not serialize cache entry '{}': {}", full_key, e);
                return;
            }
        };

        let now = Utc::now().timestamp_millis().to_string();
        let result = self.store
            .set(&full_key, &serialized)
            .and_then(|_| self.store.set(&timestamp_key(&full_key), &now));

        match result {
            Ok(()) => {
                debug!("Cached '{}' ({} bytes)", full_key, serialized.len());
                self.notify(full_key, Some(serialized));
            }
            Err(e) => {
                warn!("⚠️ Dropping cache write for '{}': {}", full_key, e);
                self.store.remove(&full_key);
                self.store.remove(&timestamp_key(&full_key));
            }
        }
    }

    /// Returns the value if it is younger than `max_age`; otherwise deletes it.
    pub fn read<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let full_key = self.key(key);
        let value = self.store.get(&full_key);
        let written_at = self.store
            .get(&timestamp_key(&full_key))
            .and_then(|t| t.parse::<i64>().ok());

        let fresh = match (&value, written_at) {
            (Some(_), Some(at)) => is_fresh(at, max_age),
            _ => false,
        };

        if !fresh {
            if value.is_some() || written_at.is_some() {
                debug!("Cache entry '{}' expired", full_key);
                self.remove(key);
            }
            return None;
        }

        match serde_json::from_str(value.as_deref().unwrap_or_default()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("⚠️ Discarding unreadable cache entry '{}': {}", full_key, e);
                self.remove(key);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let full_key = self.key(key);
        self.store.remove(&full_key);
        self.store.remove(&timestamp_key(&full_key));
        self.notify(full_key, None);
    }

    /// Removes every stale entry in this view's namespace. Returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        for ts_key in self.store.keys() {
            let Some(full_key) = ts_key.strip_suffix(TIMESTAMP_SUFFIX) else { continue };
            if !full_key.starts_with(&self.prefix) {
                continue;
            }
            let stale = self.store
                .get(&ts_key)
                .and_then(|t| t.parse::<i64>().ok())
                .map_or(true, |at| !is_fresh(at, max_age));
            if stale {
                self.store.remove(full_key);
                self.store.remove(&ts_key);
                self.notify(full_key.to_string(), None);
                removed += 1;
            }
        }
        if removed > 0 {
            info!("🧹 Swept {} stale cache entries", removed);
        }
        removed
    }
}

fn is_fresh(written_at_ms: i64, max_age: Duration) -> bool {
    let age = Utc::now().timestamp_millis().saturating_sub(written_at_ms).max(0) as u128;
    age < max_age.as_millis()
}

/// In-memory copy of one cache key, kept current from change notifications.
pub struct CacheMirror<T> {
    key: String,
    value: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for CacheMirror<T> {
    fn clone(&self) -> Self {
        Self { key: self.key.clone(), value: self.value.clone() }
    }
}

impl<T: DeserializeOwned + Clone + Send + Sync + 'static> CacheMirror<T> {
    pub fn new(cache: &LocalCache, key: &str, max_age: Duration) -> Self {
        Self {
            key: cache.key(key),
            value: Arc::new(RwLock::new(cache.read(key, max_age))),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    /// Updates the mirror if the change concerns its key. Last write wins.
    pub fn apply(&self, change: &CacheChange) {
        if change.key != self.key {
            return;
        }
        let next = change.value.as_deref().and_then(|v| serde_json::from_str(v).ok());
        *self.value.write() = next;
    }

    /// Follows the cache's change channel until it closes.
    pub fn follow(&self, cache: &LocalCache) -> JoinHandle<()> {
        let mirror = self.clone();
        let mut changes = cache.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => mirror.apply(&change),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("⚠️ Cache mirror '{}' missed {} changes", mirror.key, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn write_then_read_returns_value() {
        let cache = LocalCache::in_memory();
        cache.write("recipes-cache", &vec!["a", "b"]);
        let read: Option<Vec<String>> = cache.read("recipes-cache", DAY);
        assert_eq!(read, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn zero_max_age_expires_and_deletes_both_keys() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = LocalCache::new(store.clone());
        cache.write("recipes-cache", &1u32);
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.read::<u32>("recipes-cache", Duration::ZERO), None);
        assert!(store.get("recipes-cache").is_none());
        assert!(store.get("recipes-cache-timestamp").is_none());
    }

    #[test]
    fn entry_without_timestamp_is_treated_as_stale() {
        let store = Arc::new(MemoryCacheStore::new());
        store.set("orphan", "1").unwrap();
        let cache = LocalCache::new(store.clone());
        assert_eq!(cache.read::<u32>("orphan", DAY), None);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn full_medium_drops_write_silently() {
        let cache = LocalCache::new(Arc::new(MemoryCacheStore::with_quota(16)));
        cache.write("chat_messages", &"a message far longer than the quota allows");
        assert_eq!(cache.read::<String>("chat_messages", DAY), None);
    }

    #[test]
    fn sweep_removes_only_stale_pairs_in_scope() {
        let store = Arc::new(MemoryCacheStore::new());
        let root = LocalCache::new(store.clone());
        let alice = root.scoped("alice");
        let bob = root.scoped("bob");
        alice.write("recipes-cache", &1);
        bob.write("recipes-cache", &2);
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(alice.sweep(Duration::ZERO), 1);
        assert!(store.get("alice:recipes-cache").is_none());
        assert_eq!(bob.read::<i32>("recipes-cache", DAY), Some(2));
    }

    #[test]
    fn scoped_keys_are_prefixed() {
        let cache = LocalCache::in_memory().scoped("u1");
        assert_eq!(cache.key(CHAT_MESSAGES), "u1:chat_messages");
    }

    async fn settle(mirror: &CacheMirror<String>, expected: Option<String>) -> Option<String> {
        for _ in 0..100 {
            if mirror.get() == expected {
                break;
            }
            tokio::task::yield_now().await;
        }
        mirror.get()
    }

    #[tokio::test]
    async fn mirror_follows_writes_from_other_views() {
        let cache = LocalCache::in_memory();
        let mirror: CacheMirror<String> = CacheMirror::new(&cache, LAST_SESSION, DAY);
        assert_eq!(mirror.get(), None);
        let follower = mirror.follow(&cache);

        let other_view = cache.clone();
        other_view.write(LAST_SESSION, "yesterday");
        assert_eq!(settle(&mirror, Some("yesterday".to_string())).await.as_deref(), Some("yesterday"));

        cache.scoped("u1").write(LAST_SESSION, "elsewhere");
        other_view.remove(LAST_SESSION);
        assert_eq!(settle(&mirror, None).await, None);

        drop(cache);
        drop(other_view);
        follower.await.unwrap();
        assert_eq!(mirror.get(), None);
    }

    #[test]
    fn mirror_applies_only_its_own_key() {
        let cache = LocalCache::in_memory();
        let mirror: CacheMirror<String> = CacheMirror::new(&cache, LAST_SESSION, DAY);
        mirror.apply(&CacheChange { key: cache.key(CHAT_MESSAGES), value: Some("\"x\"".into()) });
        assert_eq!(mirror.get(), None);
        mirror.apply(&CacheChange { key: cache.key(LAST_SESSION), value: Some("\"x\"".into()) });
        assert_eq!(mirror.get().as_deref(), Some("x"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        {
            let cache = LocalCache::new(Arc::new(FileCacheStore::open(&path)));
            cache.write(USER_STATISTICS, &3u32);
        }
        let reopened = LocalCache::new(Arc::new(FileCacheStore::open(&path)));
        assert_eq!(reopened.read::<u32>(USER_STATISTICS, DAY), Some(3));
    }

    #[test]
    fn unwritable_file_store_drops_write() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every flush fail.
        let path = dir.path().join("blocked");
        fs::create_dir_all(&path).unwrap();
        let cache = LocalCache::new(Arc::new(FileCacheStore::open(&path)));
        cache.write(CURRENT_RECIPE, &"soup");
        assert_eq!(cache.read::<String>(CURRENT_RECIPE, DAY), None);
    }
}
