//! JSON and SSE endpoints used by the dashboard's scripts.
//!
//! Every route here sits behind [`require_session`](crate::auth::require_session),
//! which puts a [`Session`](crate::auth::Session) into the request extensions.

pub mod chat;
pub mod history;
pub mod profile;

use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, post},
};
use serde::Serialize;

use crate::AppState;

/// Routes mounted under `/api`, without the session gate.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat", post(chat::api_chat))
        .route("/api/diagnose", post(chat::api_diagnose))
        .route("/api/image", post(chat::api_image))
        .route(
            "/api/history",
            get(history::api_list_history).post(history::api_save_history),
        )
        .route("/api/history/{id}", delete(history::api_delete_history))
        .route("/api/records", get(history::api_records))
        .route(
            "/api/profile",
            get(profile::api_get_profile).put(profile::api_update_profile),
        )
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    version: &'static str,
    cache_entries: usize,
}

/// GET /healthz - Liveness check.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cache_entries: state.cache.stats().memory_size,
    })
}
