//! Route gate for protected pages and API calls.
//!
//! The token pair lives in two HTTP-only cookies. Pages without an access
//! cookie are redirected to the sign-in screen; API calls get a 401. Both run
//! the refresh check first and write a renewed pair back to the browser.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::AppState;
use crate::error::AppError;

use super::refresher::{Refresh, StoredTokens, refresh_if_needed};
use super::token::token_subject;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Signed-in caller, injected into request extensions by [`require_session`].
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    /// Owner of the token, used to scope cached data.
    pub subject: String,
}

/// Read the token pair from the request cookies.
pub fn tokens_from_jar(jar: &CookieJar) -> StoredTokens {
    let read = |name| {
        jar.get(name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    };
    StoredTokens {
        access: read(ACCESS_COOKIE),
        refresh: read(REFRESH_COOKIE),
    }
}

fn token_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Write the token pair to the browser.
pub fn store_tokens(mut jar: CookieJar, tokens: &StoredTokens, secure: bool) -> CookieJar {
    if let Some(access) = &tokens.access {
        jar = jar.add(token_cookie(ACCESS_COOKIE, access.clone(), secure));
    }
    if let Some(refresh) = &tokens.refresh {
        jar = jar.add(token_cookie(REFRESH_COOKIE, refresh.clone(), secure));
    }
    jar
}

/// Remove both token cookies.
pub fn clear_tokens(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

fn is_api(request: &Request) -> bool {
    request.uri().path().starts_with("/api/")
}

fn reject(jar: CookieJar, api: bool) -> Response {
    let jar = clear_tokens(jar);
    if api {
        (jar, AppError::Unauthorized).into_response()
    } else {
        (jar, Redirect::to("/signin")).into_response()
    }
}

/// Middleware guarding every protected route.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let api = is_api(&request);
    let tokens = tokens_from_jar(&jar);

    if tokens.access.is_none() && !api {
        tracing::debug!(path = %request.uri().path(), "No access token, redirecting to sign-in");
        return Redirect::to("/signin").into_response();
    }

    let decision = refresh_if_needed(&state.api, &tokens, state.config.auth.refresh_leeway_secs).await;
    let (tokens, renewed) = match decision {
        Refresh::Fresh => (tokens, false),
        Refresh::Refreshed(renewed) => (renewed, true),
        Refresh::SignInRequired => return reject(jar, api),
    };

    let Some(access_token) = tokens.access.clone() else {
        return reject(jar, api);
    };
    // Cached data is keyed by subject, so a token without one cannot be served.
    let Some(subject) = token_subject(&access_token) else {
        tracing::warn!("Access token carries no subject, requiring sign-in");
        return reject(jar, api);
    };
    request.extensions_mut().insert(Session {
        access_token,
        subject,
    });

    let response = next.run(request).await;

    // The backend can still reject a token we considered valid.
    if response.status() == StatusCode::UNAUTHORIZED {
        tracing::info!("Backend rejected session, clearing cookies");
        return (clear_tokens(jar), response).into_response();
    }

    if renewed {
        let jar = store_tokens(jar, &tokens, state.config.auth.secure_cookies);
        (jar, response).into_response()
    } else {
        response
    }
}
