//! Access token refresh.
//!
//! [`refresh_if_needed`] is the single decision routine: the web gate calls it
//! per request against the cookie pair, and [`TokenRefresher`] polls it on an
//! interval against a [`TokenStore`] for long-lived clients.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::HealthApi;
use crate::error::Result;

use super::token::{is_token_expired, unix_now};

/// Tokens as kept in client-local storage. Either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl StoredTokens {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
        }
    }
}

/// Result of one refresh check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The access token is still valid.
    Fresh,
    /// A new access token was obtained and stored.
    Refreshed,
    /// No usable refresh token; the user has to sign in again.
    SignInRequired,
}

/// Decision of [`refresh_if_needed`] carrying the replacement pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    Fresh,
    Refreshed(StoredTokens),
    SignInRequired,
}

impl Refresh {
    pub fn outcome(&self) -> RefreshOutcome {
        match self {
            Self::Fresh => RefreshOutcome::Fresh,
            Self::Refreshed(_) => RefreshOutcome::Refreshed,
            Self::SignInRequired => RefreshOutcome::SignInRequired,
        }
    }
}

/// Refresh `tokens` when the access token is missing or about to expire.
///
/// A rotated refresh token replaces the stored one; otherwise the old refresh
/// token is kept.
pub async fn refresh_if_needed(api: &HealthApi, tokens: &StoredTokens, leeway_secs: u64) -> Refresh {
    let Some(refresh_token) = tokens.refresh.as_deref() else {
        return Refresh::SignInRequired;
    };

    let needs_refresh = tokens
        .access
        .as_deref()
        .is_none_or(|access| is_token_expired(access, unix_now(), leeway_secs));
    if !needs_refresh {
        return Refresh::Fresh;
    }

    match api.auth().refresh(refresh_token).await {
        Ok(renewed) => {
            tracing::info!(
                name: "auth.token.refreshed",
                rotated = renewed.refresh.is_some(),
                "Access token refreshed"
            );
            Refresh::Refreshed(StoredTokens {
                access: Some(renewed.access),
                refresh: Some(renewed.refresh.unwrap_or_else(|| refresh_token.to_string())),
            })
        }
        Err(e) => {
            tracing::warn!(name: "auth.token.refresh_failed", error = %e, "Refresh failed");
            Refresh::SignInRequired
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token storage
// ─────────────────────────────────────────────────────────────────────────────

/// Client-local persistence of the token pair.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> StoredTokens;
    fn save(&self, tokens: &StoredTokens) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-process token storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new(tokens: StoredTokens) -> Self {
        Self {
            tokens: RwLock::new(tokens),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> StoredTokens {
        self.tokens.read().unwrap().clone()
    }

    fn save(&self, tokens: &StoredTokens) -> Result<()> {
        *self.tokens.write().unwrap() = tokens.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.tokens.write().unwrap() = StoredTokens::default();
        Ok(())
    }
}

/// Token pair kept as JSON in a single file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> StoredTokens {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return StoredTokens::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token file");
            StoredTokens::default()
        })
    }

    fn save(&self, tokens: &StoredTokens) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(tokens)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Poller
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps a stored token pair fresh.
pub struct TokenRefresher {
    api: HealthApi,
    store: Arc<dyn TokenStore>,
    leeway_secs: u64,
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("api", &self.api)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl TokenRefresher {
    pub fn new(api: HealthApi, store: Arc<dyn TokenStore>, leeway_secs: u64) -> Self {
        Self {
            api,
            store,
            leeway_secs,
        }
    }

    /// Run one check against the store, persisting whatever changed.
    pub async fn check_and_refresh(&self) -> RefreshOutcome {
        let tokens = self.store.load();
        let decision = refresh_if_needed(&self.api, &tokens, self.leeway_secs).await;

        match &decision {
            Refresh::Fresh => {}
            Refresh::Refreshed(renewed) => {
                if let Err(e) = self.store.save(renewed) {
                    tracing::error!(error = %e, "Failed to store refreshed tokens");
                }
            }
            Refresh::SignInRequired => {
                if let Err(e) = self.store.clear() {
                    tracing::error!(error = %e, "Failed to clear stored tokens");
                }
            }
        }
        decision.outcome()
    }

    /// Check now, then every `interval`, until sign-in is required.
    ///
    /// Dropping the returned handle stops the poller.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> RefreshHandle {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = self.check_and_refresh().await;
                tracing::debug!(outcome = ?outcome, "Token check complete");
                if tx.send(Some(outcome)).is_err() {
                    break;
                }
                if outcome == RefreshOutcome::SignInRequired {
                    break;
                }
            }
        });
        RefreshHandle { outcomes: rx, task }
    }
}

/// Handle to a running [`TokenRefresher`] poller.
#[derive(Debug)]
pub struct RefreshHandle {
    outcomes: watch::Receiver<Option<RefreshOutcome>>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Outcome of the most recent check, if one has completed.
    pub fn latest(&self) -> Option<RefreshOutcome> {
        *self.outcomes.borrow()
    }

    /// Wait for the next completed check.
    ///
    /// Returns `None` once the poller has stopped.
    pub async fn changed(&mut self) -> Option<RefreshOutcome> {
        self.outcomes.changed().await.ok()?;
        *self.outcomes.borrow_and_update()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
