use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::StreamExt;
use health_assistant_web::auth::{
    MemoryTokenStore, RefreshOutcome, StoredTokens, TokenRefresher, TokenStore,
};
use health_assistant_web::backend::{HealthApi, RegisterRequest};
use health_assistant_web::cache::{CacheManager, MemoryStore};
use health_assistant_web::chat::{ChatHistoryService, StreamConsumer, Transcript};
use health_assistant_web::error::AppError;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn make_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

fn register_request() -> RegisterRequest {
    RegisterRequest {
        username: "ada".to_string(),
        email: "ada@example.com".to_string(),
        password: "secret".to_string(),
        age: Some(36),
        gender: "Female".to_string(),
        height_cm: Some(165.0),
        weight_kg: Some(58.0),
        blood_group: "A+".to_string(),
        allergies: "None".to_string(),
    }
}

#[tokio::test]
async fn test_obtain_token_surfaces_field_errors() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "non_field_errors": ["Unable to log in with provided credentials."]
        })))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let err = api
        .auth()
        .obtain_token("ada@example.com", "wrong")
        .await
        .unwrap_err();

    match err {
        AppError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Unable to log in with provided credentials.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_obtain_token_falls_back_to_generic_message() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let err = api.auth().obtain_token("a@b.c", "pw").await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Api { status: 500, ref message } if message == "Signin failed. Please try again."
    ));
}

#[tokio::test]
async fn test_register_reports_backend_message() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/register/"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": "A user with that email already exists." })),
        )
        .mount(&backend)
        .await;

    let api = HealthApi::new(format!("{}/", backend.uri())).unwrap();
    let err = api.auth().register(&register_request()).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Api { ref message, .. } if message == "A user with that email already exists."
    ));
}

#[tokio::test]
async fn test_refresh_returns_new_access_token() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({ "refresh": "r-1" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access": "a-2", "refresh": "r-2" })),
        )
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let renewed = api.auth().refresh("r-1").await.unwrap();
    assert_eq!(renewed.access, "a-2");
    assert_eq!(renewed.refresh.as_deref(), Some("r-2"));
}

#[tokio::test]
async fn test_stream_diagnosis_collects_reply() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/diagnose/"))
        .and(header("authorization", "Bearer token"))
        .and(body_json(json!({ "symptom_names": ["fever", "sore throat"] })))
        .respond_with(ResponseTemplate::new(200).set_body_string("Likely a viral infection."))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let stream = api
        .chat()
        .stream_diagnosis("token", " fever ,, sore throat ")
        .await
        .unwrap();

    let consumer = StreamConsumer::begin(Transcript::new(), "fever, sore throat".to_string());
    let mut deltas = Vec::new();
    let (transcript, result) = consumer.consume(stream, |d| deltas.push(d.to_string())).await;

    result.unwrap();
    assert_eq!(deltas.concat(), "Likely a viral infection.");
    assert_eq!(transcript.len(), 2);
}

#[tokio::test]
async fn test_chat_stream_yields_body_chunks() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Stay hydrated."))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let mut stream = api
        .chat()
        .stream_chat("token", "tips", "session_1")
        .await
        .unwrap();

    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, b"Stay hydrated.");
}

#[tokio::test]
async fn test_unauthorized_history_maps_to_session_expired() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let err = api.chat().history("token").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
}

#[tokio::test]
async fn test_history_service_serves_cache_until_invalidated() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "message": "Hello", "is_user": true, "timestamp": "2025-03-01T10:00:00Z" },
            { "id": 2, "message": "Hi there", "is_user": false, "timestamp": "2025-03-01T10:00:01Z" }
        ])))
        .up_to_n_times(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let cache = Arc::new(CacheManager::new(Arc::new(MemoryStore::new())));
    let history = ChatHistoryService::new(api, cache, "7");

    let first = history.fetch("token").await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(history.fetch("token").await.unwrap(), first);

    // Nothing cached and the backend is down: an empty list, not an error.
    history.invalidate();
    assert!(history.fetch("token").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_service_propagates_expired_session() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&backend)
        .await;

    let api = HealthApi::new(backend.uri()).unwrap();
    let cache = Arc::new(CacheManager::new(Arc::new(MemoryStore::new())));
    let history = ChatHistoryService::new(api, cache, "7");

    assert!(matches!(
        history.fetch("token").await,
        Err(AppError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_refresher_poller_reports_refresh() {
    let backend = MockServer::start().await;
    let fresh = make_token(&json!({ "exp": 4_000_000_000u64, "user_id": 7 }));
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": fresh })))
        .expect(1)
        .mount(&backend)
        .await;

    let expired = make_token(&json!({ "exp": 1, "user_id": 7 }));
    let store = Arc::new(MemoryTokenStore::new(StoredTokens::new(expired, "r-1")));
    let refresher = Arc::new(TokenRefresher::new(
        HealthApi::new(backend.uri()).unwrap(),
        store.clone(),
        300,
    ));

    let mut handle = refresher.spawn(Duration::from_millis(20));
    assert_eq!(handle.changed().await, Some(RefreshOutcome::Refreshed));
    assert_eq!(handle.changed().await, Some(RefreshOutcome::Fresh));

    let stored = store.load();
    assert_eq!(stored.access.as_deref(), Some(fresh.as_str()));
    assert_eq!(stored.refresh.as_deref(), Some("r-1"));
}

#[tokio::test]
async fn test_refresher_clears_store_when_refresh_rejected() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&backend)
        .await;

    let expired = make_token(&json!({ "exp": 1 }));
    let store = Arc::new(MemoryTokenStore::new(StoredTokens::new(expired, "stale")));
    let refresher = TokenRefresher::new(HealthApi::new(backend.uri()).unwrap(), store.clone(), 0);

    assert_eq!(
        refresher.check_and_refresh().await,
        RefreshOutcome::SignInRequired
    );
    assert_eq!(store.load(), StoredTokens::default());
}

#[tokio::test]
async fn test_refresher_poller_stops_when_sign_in_required() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token is blacklisted" })),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let expired = make_token(&json!({ "exp": 1, "user_id": 7 }));
    let store = Arc::new(MemoryTokenStore::new(StoredTokens::new(expired, "revoked")));
    let refresher = Arc::new(TokenRefresher::new(
        HealthApi::new(backend.uri()).unwrap(),
        store.clone(),
        300,
    ));

    let mut handle = refresher.spawn(Duration::from_millis(20));
    assert_eq!(handle.changed().await, Some(RefreshOutcome::SignInRequired));
    // The poller has exited; no further checks are published.
    assert_eq!(handle.changed().await, None);
    assert_eq!(handle.latest(), Some(RefreshOutcome::SignInRequired));
    assert_eq!(store.load(), StoredTokens::default());
}
