use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::api;
use crate::auth::require_session;
use crate::config::AppConfig;
use crate::pages;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    info!(
        name: "backend.config.loaded",
        base_url = %config.backend.base_url,
        timeout_secs = config.backend.timeout_secs,
        "Backend configuration loaded"
    );

    let state = AppState::from_config(config.clone())?;
    info!(name: "cache.ready", dir = %config.cache.dir, "Cache directory ready");
    let _purger = state
        .cache
        .clone()
        .spawn_purger(Duration::from_secs(config.cache.purge_interval_secs.max(1)));

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the full application router.
///
/// The dashboard and `/api/*` sit behind the session gate; sign-in, sign-up,
/// theme switching and the liveness check do not.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(pages::dashboard::dashboard))
        .merge(api::router())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let public = Router::new()
        .route(
            "/signin",
            get(pages::auth::signin_page).post(pages::auth::signin_submit),
        )
        .route(
            "/signup",
            get(pages::auth::signup_page).post(pages::auth::signup_submit),
        )
        .route("/signout", post(pages::auth::signout))
        .route("/theme", post(pages::toggle_theme))
        .route("/healthz", get(api::healthz));

    let timeout_duration = Duration::from_secs(state.config.resilience.request_timeout_secs);
    let body_limit = state.config.resilience.body_limit_bytes;

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => {
                        tracing::warn!(timeout_secs = timeout_duration.as_secs(), "Request timed out");
                        (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                    }
                }
            },
        ))
        .with_state(state)
}
