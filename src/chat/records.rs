//! Health records: the user's full message history, cached for longer than
//! the chat sidebar because the dashboard view is expensive to rebuild.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::backend::{ChatLogEntry, HealthApi};
use crate::cache::{CacheDuration, CacheKey, CacheManager, scoped_key};
use crate::error::Result;

/// Cached form of the records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecordsData {
    pub messages: Vec<ChatLogEntry>,
    /// UNIX milliseconds.
    pub fetched_at: i64,
}

/// Records plus where they came from.
#[derive(Debug, Clone, Serialize)]
pub struct RecordsResult {
    pub messages: Vec<ChatLogEntry>,
    pub from_cache: bool,
}

/// Cached data available right away, and a task producing fresh data.
#[derive(Debug)]
pub struct BackgroundRefresh {
    pub cached: Option<Vec<ChatLogEntry>>,
    pub fresh: JoinHandle<Result<Vec<ChatLogEntry>>>,
}

#[derive(Debug, Clone)]
pub struct HealthRecordsService {
    api: HealthApi,
    cache: Arc<CacheManager>,
    key: String,
}

impl HealthRecordsService {
    pub fn new(api: HealthApi, cache: Arc<CacheManager>, scope: &str) -> Self {
        Self {
            api,
            cache,
            key: scoped_key(scope, CacheKey::HEALTH_RECORDS_DATA),
        }
    }

    fn cached(&self) -> Option<Vec<ChatLogEntry>> {
        self.cache
            .get::<HealthRecordsData>(&self.key)
            .map(|data| data.messages)
    }

    /// Records from cache unless `force_refresh`, else from the backend.
    pub async fn get(&self, token: &str, force_refresh: bool) -> Result<RecordsResult> {
        if !force_refresh && let Some(messages) = self.cached() {
            return Ok(RecordsResult {
                messages,
                from_cache: true,
            });
        }

        let messages = self.api.chat().history(token).await?;
        self.store(&messages);
        Ok(RecordsResult {
            messages,
            from_cache: false,
        })
    }

    /// Cache `messages` for [`CacheDuration::LONG`].
    pub fn store(&self, messages: &[ChatLogEntry]) {
        let data = HealthRecordsData {
            messages: messages.to_vec(),
            fetched_at: chrono::Utc::now().timestamp_millis(),
        };
        self.cache.set(&self.key, &data, CacheDuration::LONG);
    }

    /// Drop the cached records, e.g. after new messages were saved.
    pub fn invalidate(&self) {
        self.cache.clear(&self.key);
    }

    /// Warm the cache. Failures are logged and otherwise ignored.
    pub async fn prefetch(&self, token: &str) {
        match self.api.chat().history(token).await {
            Ok(messages) => {
                tracing::debug!(count = messages.len(), "Health records prefetched");
                self.store(&messages);
            }
            Err(e) => tracing::warn!(error = %e, "Error prefetching health records"),
        }
    }

    /// Return cached records now and refresh them in the background.
    ///
    /// If the refresh fails the task yields the cached records when there
    /// were any, otherwise the error.
    pub fn get_with_background_refresh(&self, token: &str) -> BackgroundRefresh {
        let cached = self.cached();
        let service = self.clone();
        let token = token.to_string();
        let fallback = cached.clone();

        let fresh = tokio::spawn(async move {
            match service.api.chat().history(&token).await {
                Ok(messages) => {
                    service.store(&messages);
                    Ok(messages)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error refreshing health records in background");
                    fallback.ok_or(e)
                }
            }
        });

        BackgroundRefresh { cached, fresh }
    }
}
