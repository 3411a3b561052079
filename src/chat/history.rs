//! Chat history as titled sessions.
//!
//! The backend stores a flat, chronological list of messages. A session
//! opens with a user message and collects the replies that follow it; the
//! next user message opens a new session once the current one holds a reply.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{ChatLogEntry, HealthApi};
use crate::cache::{CacheDuration, CacheKey, CacheManager, scoped_key};
use crate::error::{AppError, Result};

use super::ChatMessage;

/// Sessions are titled with this many characters of their first message.
const TITLE_LENGTH: usize = 30;

/// Prefix of session ids; the rest is the id of the opening message.
const SESSION_PREFIX: &str = "session-";

/// A titled run of consecutive messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub last_message: String,
    /// Time of the opening message, UNIX milliseconds.
    pub timestamp: i64,
    pub messages: Vec<ChatLogEntry>,
}

/// Group a chronological history into sessions, newest first.
///
/// Replies that precede any user message have no session and are dropped.
pub fn group_into_sessions(entries: &[ChatLogEntry]) -> Vec<ChatSession> {
    let mut sessions = Vec::new();
    let mut current: Option<ChatSession> = None;

    for entry in entries {
        let opens_session = entry.is_user && current.as_ref().is_none_or(|s| s.messages.len() > 1);
        if opens_session {
            if let Some(done) = current.take() {
                sessions.push(done);
            }
            current = Some(ChatSession {
                id: format!("{SESSION_PREFIX}{}", entry.id),
                title: truncate_text(&entry.message, TITLE_LENGTH),
                last_message: entry.message.clone(),
                timestamp: parse_timestamp_ms(&entry.timestamp),
                messages: Vec::new(),
            });
        }

        if let Some(session) = current.as_mut() {
            session.messages.push(entry.clone());
            if !entry.is_user {
                session.last_message.clone_from(&entry.message);
            }
        }
    }

    sessions.extend(current);
    sessions.reverse();
    sessions
}

fn parse_timestamp_ms(raw: &str) -> i64 {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_default()
}

/// Cut `text` to `length` characters, marking the cut with "...".
pub fn truncate_text(text: &str, length: usize) -> String {
    if text.chars().count() <= length {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(length).collect();
    cut.push_str("...");
    cut
}

/// Relative label for `timestamp_ms` as seen at `now_ms`.
pub fn format_time_ago(timestamp_ms: i64, now_ms: i64) -> String {
    let seconds = (now_ms - timestamp_ms) / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if seconds < 60 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        Utc.timestamp_millis_opt(timestamp_ms)
            .single()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}

/// Cached access to the signed-in user's chat sessions.
#[derive(Debug, Clone)]
pub struct ChatHistoryService {
    api: HealthApi,
    cache: Arc<CacheManager>,
    key: String,
}

impl ChatHistoryService {
    /// `scope` identifies the user whose history is cached.
    pub fn new(api: HealthApi, cache: Arc<CacheManager>, scope: &str) -> Self {
        Self {
            api,
            cache,
            key: scoped_key(scope, CacheKey::CHAT_HISTORY),
        }
    }

    /// Sessions from cache when available, else from the backend.
    ///
    /// Backend failures fall back to whatever is cached (possibly nothing).
    /// A rejected session is still reported so the caller can sign out.
    pub async fn fetch(&self, token: &str) -> Result<Vec<ChatSession>> {
        if let Some(cached) = self.cache.get::<Vec<ChatSession>>(&self.key)
            && !cached.is_empty()
        {
            tracing::debug!(sessions = cached.len(), "Chat history served from cache");
            return Ok(cached);
        }

        match self.api.chat().history(token).await {
            Ok(entries) => {
                let sessions = group_into_sessions(&entries);
                self.cache.set(&self.key, &sessions, CacheDuration::MEDIUM);
                tracing::debug!(
                    entries = entries.len(),
                    sessions = sessions.len(),
                    "Chat history fetched"
                );
                Ok(sessions)
            }
            Err(AppError::Unauthorized) => Err(AppError::Unauthorized),
            Err(e) => {
                tracing::error!(error = %e, "Error fetching chat history");
                Ok(self.cache.get(&self.key).unwrap_or_default())
            }
        }
    }

    /// Persist the text messages of a conversation, in order.
    pub async fn save(&self, token: &str, messages: &[ChatMessage]) -> Result<()> {
        for message in messages {
            if let Some(text) = message.text() {
                let is_user = message.sender() == super::Sender::User;
                self.api.chat().save_log(token, text, is_user).await?;
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Delete a session by its id (`session-{chat id}`).
    pub async fn delete(&self, token: &str, session_id: &str) -> Result<()> {
        let chat_id = session_id
            .strip_prefix(SESSION_PREFIX)
            .unwrap_or(session_id);
        let result = self.api.chat().delete(token, chat_id).await;
        self.invalidate();
        result
    }

    pub fn invalidate(&self) {
        self.cache.clear(&self.key);
    }
}
