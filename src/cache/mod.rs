//! Two-level expiring cache for chat and health-record data.
//!
//! Entries live in an in-memory map and are mirrored to a
//! [`PersistentStore`] under a `cache_` prefix, so a restarted process (or
//! another worker sharing the directory) can pick them up again until they
//! expire.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use health_assistant_web::cache::{CacheDuration, CacheManager, MemoryStore};
//!
//! let cache = CacheManager::new(Arc::new(MemoryStore::new()));
//! cache.set("greeting", &"hello", CacheDuration::SHORT);
//! assert_eq!(cache.get::<String>("greeting").as_deref(), Some("hello"));
//! ```

mod store;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::task::JoinHandle;

pub use store::{FileStore, MemoryStore, PersistentStore};

/// Prefix of every key this cache writes to the persistent store.
const STORE_PREFIX: &str = "cache_";

/// Well-known cache keys.
#[derive(Debug)]
pub struct CacheKey;

impl CacheKey {
    pub const CHAT_HISTORY: &'static str = "chat_history";
    pub const HEALTH_RECORDS: &'static str = "health_records";
    pub const USER_PROFILE: &'static str = "user_profile";
    pub const CHAT_SESSIONS: &'static str = "chat_sessions";
    pub const HEALTH_RECORDS_DATA: &'static str = "health_records_data";
}

/// Standard time-to-live values.
#[derive(Debug)]
pub struct CacheDuration;

impl CacheDuration {
    pub const SHORT: Duration = Duration::from_secs(60);
    pub const MEDIUM: Duration = Duration::from_secs(5 * 60);
    pub const LONG: Duration = Duration::from_secs(30 * 60);
    pub const EXTENDED: Duration = Duration::from_secs(60 * 60);
}

/// Key for `key` owned by `scope` (typically the signed-in user).
pub fn scoped_key(scope: &str, key: &str) -> String {
    format!("{scope}:{key}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    data: serde_json::Value,
    /// Insertion time, UNIX milliseconds.
    timestamp: i64,
    /// Lifetime in milliseconds.
    expires_in: i64,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        now - self.timestamp > self.expires_in
    }
}

/// Snapshot of the in-memory level.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_size: usize,
    pub cache_keys: Vec<String>,
}

/// Expiring key/value cache.
#[derive(Debug)]
pub struct CacheManager {
    memory: RwLock<HashMap<String, CacheEntry>>,
    store: Arc<dyn PersistentStore>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn store_key(key: &str) -> String {
    format!("{STORE_PREFIX}{key}")
}

impl CacheManager {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Store `data` under `key` for `ttl`.
    ///
    /// A failing persistent store only loses the second level.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Duration) {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Refusing to cache unserializable value");
                return;
            }
        };
        let entry = CacheEntry {
            data,
            timestamp: now_ms(),
            expires_in: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        };

        let persisted = serde_json::to_string(&entry)
            .map_err(crate::error::AppError::from)
            .and_then(|raw| self.store.set(&store_key(key), &raw));
        if let Err(e) = persisted {
            tracing::warn!(key = %key, error = %e, "Failed to persist cache entry");
        }

        self.memory.write().unwrap().insert(key.to_string(), entry);
    }

    /// Fetch a live entry, promoting persisted entries into memory.
    ///
    /// Expired entries are dropped from whichever level they were found in.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = now_ms();

        let cached = self.memory.read().unwrap().get(key).cloned();
        if let Some(entry) = cached {
            if entry.is_expired(now) {
                self.memory.write().unwrap().remove(key);
                return None;
            }
            return decode(key, entry.data);
        }

        let entry = self.load_persisted(key)?;
        if entry.is_expired(now) {
            if let Err(e) = self.store.remove(&store_key(key)) {
                tracing::warn!(key = %key, error = %e, "Failed to drop expired cache entry");
            }
            return None;
        }
        let data = entry.data.clone();
        self.memory.write().unwrap().insert(key.to_string(), entry);
        decode(key, data)
    }

    /// Whether a live entry exists. Never mutates either level.
    pub fn has(&self, key: &str) -> bool {
        let now = now_ms();
        if let Some(entry) = self.memory.read().unwrap().get(key) {
            return !entry.is_expired(now);
        }
        self.load_persisted(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Drop `key` from both levels.
    pub fn clear(&self, key: &str) {
        self.memory.write().unwrap().remove(key);
        if let Err(e) = self.store.remove(&store_key(key)) {
            tracing::warn!(key = %key, error = %e, "Failed to clear cache entry");
        }
    }

    /// Drop every cache entry. Foreign keys in the store are left alone.
    pub fn clear_all(&self) {
        self.memory.write().unwrap().clear();
        match self.store.keys() {
            Ok(keys) => {
                for key in keys.iter().filter(|k| k.starts_with(STORE_PREFIX)) {
                    if let Err(e) = self.store.remove(key) {
                        tracing::warn!(key = %key, error = %e, "Failed to clear cache entry");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to list cache entries"),
        }
    }

    /// Remove expired entries from both levels.
    ///
    /// Persisted entries that cannot be parsed are removed too. Returns the
    /// number of in-memory entries dropped.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let removed = {
            let mut guard = self.memory.write().unwrap();
            let before = guard.len();
            guard.retain(|_, entry| !entry.is_expired(now));
            before - guard.len()
        };

        match self.store.keys() {
            Ok(keys) => {
                for key in keys.iter().filter(|k| k.starts_with(STORE_PREFIX)) {
                    let live = match self.store.get(key) {
                        Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
                            .is_ok_and(|entry| !entry.is_expired(now)),
                        Ok(None) => true,
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "Failed to read cache entry");
                            true
                        }
                    };
                    if !live && let Err(e) = self.store.remove(key) {
                        tracing::warn!(key = %key, error = %e, "Failed to drop expired cache entry");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to list cache entries"),
        }
        removed
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until the
    /// handle is aborted.
    pub fn spawn_purger(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Purged expired cache entries");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let memory = self.memory.read().unwrap();
        CacheStats {
            memory_size: memory.len(),
            cache_keys: memory.keys().cloned().collect(),
        }
    }

    fn load_persisted(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.store.get(&store_key(key)) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read cache entry");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| tracing::warn!(key = %key, error = %e, "Ignoring corrupt cache entry"))
            .ok()
    }
}

fn decode<T: DeserializeOwned>(key: &str, data: serde_json::Value) -> Option<T> {
    serde_json::from_value(data)
        .map_err(|e| tracing::warn!(key = %key, error = %e, "Cached value has unexpected shape"))
        .ok()
}
