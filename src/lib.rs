//! Health Assistant web front-end
//!
//! A browser-facing server for an AI health assistant. Users sign in, describe
//! symptoms or upload images, and watch the assistant's reply stream in. All
//! medical logic lives in a remote backend; this crate handles sessions,
//! caching, streaming and presentation.
//!
//! # Architecture
//!
//! - **Server**: Axum pages and a JSON/SSE API in front of the backend
//! - **Auth**: token pair in HTTP-only cookies, refreshed before expiry
//! - **Cache**: two-level expiring cache for history and health records
//! - **Terminal**: the same chat flow from a command line
//!
//! # Modules
//!
//! - [`backend`]: typed client for the health backend
//! - [`auth`]: token inspection, refresh and route gating
//! - [`cache`]: expiring memory + persistent cache
//! - [`chat`]: transcript streaming, history sessions, health records
//! - [`events`]: SSE frames relayed to the browser

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod api;
pub mod auth;
pub mod backend;
pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod pages;
pub mod profile;
pub mod server;
pub mod terminal;
pub mod theme;
pub mod uploads;

use std::sync::Arc;
use std::time::Duration;

use crate::backend::HealthApi;
use crate::cache::{CacheManager, FileStore, PersistentStore};
use crate::config::AppConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Client for the health backend.
    pub api: HealthApi,
    /// Cache shared by every signed-in user; keys are scoped per user.
    pub cache: Arc<CacheManager>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build the state from configuration, persisting the cache on disk.
    pub fn from_config(config: Arc<AppConfig>) -> error::Result<Self> {
        let store = Arc::new(FileStore::new(&config.cache.dir)?);
        Self::with_store(config, store)
    }

    /// Build the state with a caller-supplied cache store.
    pub fn with_store(
        config: Arc<AppConfig>,
        store: Arc<dyn PersistentStore>,
    ) -> error::Result<Self> {
        let api = HealthApi::with_timeout(
            &config.backend.base_url,
            Duration::from_secs(config.backend.timeout_secs),
        )?;
        Ok(Self {
            api,
            cache: Arc::new(CacheManager::new(store)),
            config,
        })
    }
}
