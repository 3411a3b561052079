//! The signed-in user's health profile.

use axum::{Extension, Json, extract::State};

use crate::AppState;
use crate::auth::Session;
use crate::cache::{CacheKey, scoped_key};
use crate::error::Result;
use crate::profile::{ProfileUpdate, UserProfile};

fn profile_key(session: &Session) -> String {
    scoped_key(&session.subject, CacheKey::USER_PROFILE)
}

/// Load the profile, from cache when possible.
pub(crate) async fn load_profile(state: &AppState, session: &Session) -> Result<UserProfile> {
    let key = profile_key(session);
    if let Some(profile) = state.cache.get::<UserProfile>(&key) {
        return Ok(profile);
    }
    let profile = state.api.profile().get(&session.access_token).await?;
    state.cache.set(
        &key,
        &profile,
        std::time::Duration::from_secs(state.config.cache.default_ttl_secs),
    );
    Ok(profile)
}

/// GET /api/profile - Current profile.
pub async fn api_get_profile(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<UserProfile>> {
    Ok(Json(load_profile(&state, &session).await?))
}

/// PUT /api/profile - Validate and save the editable fields.
pub async fn api_update_profile(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>> {
    let update = update.cleaned()?;
    let key = profile_key(&session);

    let response = state
        .api
        .profile()
        .update(&session.access_token, &update)
        .await?;
    state.cache.clear(&key);

    let profile = match response.user {
        Some(user) => user,
        None => state.api.profile().get(&session.access_token).await?,
    };
    tracing::info!(subject = %session.subject, "Profile updated");
    Ok(Json(profile))
}
