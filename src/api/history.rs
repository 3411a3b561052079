//! Chat history and health records.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::AppState;
use crate::auth::Session;
use crate::chat::records::RecordsResult;
use crate::chat::{ChatHistoryService, ChatMessage, ChatSession, HealthRecordsService};
use crate::error::Result;

pub(crate) fn history_service(state: &AppState, session: &Session) -> ChatHistoryService {
    ChatHistoryService::new(state.api.clone(), state.cache.clone(), &session.subject)
}

pub(crate) fn records_service(state: &AppState, subject: &str) -> HealthRecordsService {
    HealthRecordsService::new(state.api.clone(), state.cache.clone(), subject)
}

/// Drop everything derived from the user's message history.
pub(crate) fn invalidate_user_caches(state: &AppState, subject: &str) {
    ChatHistoryService::new(state.api.clone(), state.cache.clone(), subject).invalidate();
    records_service(state, subject).invalidate();
}

/// GET /api/history - Chat sessions, newest first.
pub async fn api_list_history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<ChatSession>>> {
    let sessions = history_service(&state, &session)
        .fetch(&session.access_token)
        .await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
pub struct SaveHistoryRequest {
    pub messages: Vec<ChatMessage>,
}

/// POST /api/history - Persist a conversation's text messages.
pub async fn api_save_history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SaveHistoryRequest>,
) -> Result<StatusCode> {
    history_service(&state, &session)
        .save(&session.access_token, &req.messages)
        .await?;
    records_service(&state, &session.subject).invalidate();
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/history/{id} - Delete a chat session.
pub async fn api_delete_history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    tracing::info!(subject = %session.subject, session_id = %id, "Deleting chat session");
    let result = history_service(&state, &session)
        .delete(&session.access_token, &id)
        .await;
    records_service(&state, &session.subject).invalidate();
    result?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordsQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// GET /api/records - Health records, from cache unless `?refresh=true`.
pub async fn api_records(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<RecordsResult>> {
    let result = records_service(&state, &session.subject)
        .get(&session.access_token, query.refresh)
        .await?;
    Ok(Json(result))
}
