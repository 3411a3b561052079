use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use health_assistant_web::AppState;
use health_assistant_web::cache::MemoryStore;
use health_assistant_web::config::{
    AppConfig, AuthConfig, BackendConfig, CacheConfig, ResilienceConfig, ServerConfig,
    UploadConfig,
};
use health_assistant_web::server::router;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header as header_is, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(backend_url: &str) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        backend: BackendConfig {
            base_url: backend_url.to_string(),
            timeout_secs: 5,
        },
        auth: AuthConfig {
            refresh_leeway_secs: 300,
            refresh_interval_secs: 300,
            secure_cookies: false,
        },
        cache: CacheConfig {
            dir: "unused".to_string(),
            default_ttl_secs: 60,
            purge_interval_secs: 300,
        },
        uploads: UploadConfig {
            max_image_bytes: 5 * 1024 * 1024,
        },
        resilience: ResilienceConfig {
            request_timeout_secs: 10,
            body_limit_bytes: 10 * 1024 * 1024,
        },
    }
}

fn test_server(backend: &MockServer) -> TestServer {
    let config = Arc::new(test_config(&backend.uri()));
    let state = AppState::with_store(config, Arc::new(MemoryStore::new())).unwrap();
    TestServer::new(router(state)).unwrap()
}

fn make_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn valid_token() -> String {
    make_token(&json!({ "exp": now() + 3600, "user_id": 7 }))
}

fn cookies(access: &str, refresh: &str) -> (HeaderName, HeaderValue) {
    (
        header::COOKIE,
        HeaderValue::from_str(&format!("access_token={access}; refresh_token={refresh}")).unwrap(),
    )
}

fn set_cookies(response: &axum_test::TestResponse) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn location(response: &axum_test::TestResponse) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_healthz() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);

    let response = server.get("/healthz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache_entries"], 0);
}

#[tokio::test]
async fn test_dashboard_redirects_without_cookie() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);

    let response = server.get("/").await;
    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/signin");
}

#[tokio::test]
async fn test_api_without_session_is_unauthorized() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);

    let response = server.get("/api/history").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.json::<Value>()["error"],
        "Your session has expired. Please login again."
    );
}

#[tokio::test]
async fn test_expiring_access_token_is_refreshed() {
    let backend = MockServer::start().await;
    let fresh = valid_token();
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .and(body_json(json!({ "refresh": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": fresh })))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .and(header_is("authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let expiring = make_token(&json!({ "exp": now() + 60, "user_id": 7 }));
    let (name, value) = cookies(&expiring, "refresh-1");

    let response = server.get("/api/history").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let written = set_cookies(&response);
    assert!(written.iter().any(|c| c.starts_with(&format!("access_token={fresh}"))));
    // The backend did not rotate it, so the old refresh token is kept.
    assert!(written.iter().any(|c| c.starts_with("refresh_token=refresh-1")));
}

#[tokio::test]
async fn test_failed_refresh_redirects_and_clears_cookies() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token is blacklisted" })),
        )
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let expired = make_token(&json!({ "exp": 1, "user_id": 7 }));
    let (name, value) = cookies(&expired, "stale");

    let response = server.get("/").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/signin");
    assert!(
        set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("access_token=;") || c.starts_with("access_token=\"\""))
    );
}

#[tokio::test]
async fn test_backend_rejection_clears_cookies() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server.get("/api/history").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(
        set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("refresh_token="))
    );
}

#[tokio::test]
async fn test_history_is_grouped_and_cached() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "message": "I have a headache", "is_user": true, "timestamp": "2025-03-01T10:00:00Z" },
            { "id": 2, "message": "Drink water.", "is_user": false, "timestamp": "2025-03-01T10:00:05Z" },
            { "id": 3, "message": "How to improve my sleep?", "is_user": true, "timestamp": "2025-03-02T09:00:00Z" },
            { "id": 4, "message": "Keep a schedule.", "is_user": false, "timestamp": "2025-03-02T09:00:04Z" }
        ])))
        .expect(1)
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let first = server
        .get("/api/history")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(first.as_array().unwrap().len(), 2);
    assert_eq!(first[0]["id"], "session-3");
    assert_eq!(first[0]["lastMessage"], "Keep a schedule.");
    assert_eq!(first[1]["title"], "I have a headache");

    // Served from cache: the mock expects a single call.
    let second = server
        .get("/api/history")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_delete_strips_session_prefix() {
    let backend = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/chat/delete/12/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server
        .delete("/api/history/session-12")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_chat_reply_is_relayed_as_sse() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/"))
        .and(body_json(json!({ "message": "I have a headache", "session_id": "session_1_abc" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain; charset=utf-8")
                .set_body_string("Rest and hydrate."),
        )
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server
        .post("/api/chat")
        .add_header(name, value)
        .json(&json!({ "message": " I have a headache ", "session_id": "session_1_abc" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let body = response.text();
    assert!(body.starts_with("event: stream.start\n"));
    assert!(body.contains("event: message.delta\n"));
    assert!(body.contains(
        r#"event: done
data: {"type":"done","data":{"text":"Rest and hydrate."}}"#
    ));
}

#[tokio::test]
async fn test_chat_requires_a_message() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server
        .post("/api/chat")
        .add_header(name, value)
        .json(&json!({ "message": "   " }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.json::<Value>()["fields"]["message"],
        "Please enter a message"
    );
}

#[tokio::test]
async fn test_diagnose_sends_symptom_list() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/diagnose/"))
        .and(body_json(json!({ "symptom_names": ["fever", "cough"] })))
        .respond_with(ResponseTemplate::new(200).set_body_string("Possibly a cold."))
        .expect(1)
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server
        .post("/api/diagnose")
        .add_header(name, value)
        .json(&json!({ "symptoms": "fever, cough, " }))
        .await;
    assert!(response.text().contains("Possibly a cold."));
}

#[tokio::test]
async fn test_profile_update_is_validated() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server
        .put("/api/profile")
        .add_header(name, value)
        .json(&json!({
            "full_name": "Ada",
            "age": 200,
            "gender": "Female",
            "height_cm": 165.0,
            "weight_kg": 58.0,
            "blood_group": "A+",
            "allergies": ""
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert_eq!(body["error"], "Please fix 2 errors before submitting");
    assert_eq!(
        body["fields"]["age"],
        "Age is required and must be between 1 and 150"
    );
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_update_returns_saved_user() {
    let backend = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/user/profile/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Profile updated",
            "user": { "email": "ada@example.com", "full_name": "Ada Lovelace", "age": 36 }
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server
        .put("/api/profile")
        .add_header(name, value)
        .json(&json!({
            "full_name": "Ada Lovelace",
            "age": 36,
            "gender": "Female",
            "height_cm": 165.0,
            "weight_kg": 58.0,
            "blood_group": "A+",
            "allergies": "None"
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["full_name"], "Ada Lovelace");
}

#[tokio::test]
async fn test_image_upload_must_be_an_image() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let form = MultipartForm::new().add_part(
        "image",
        Part::bytes(b"hello".to_vec())
            .file_name("notes.txt")
            .mime_type("text/plain"),
    );
    let response = server
        .post("/api/image")
        .add_header(name, value)
        .multipart(form)
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.json::<Value>()["fields"]["image"],
        "Please select an image file"
    );
}

#[tokio::test]
async fn test_image_analysis_unavailable() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/img-diagnose/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[Error] no vision model"))
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let form = MultipartForm::new().add_part(
        "image",
        Part::bytes(vec![0x89, b'P', b'N', b'G'])
            .file_name("scan.png")
            .mime_type("image/png"),
    );
    let response = server
        .post("/api/image")
        .add_header(name, value)
        .multipart(form)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(
        body["reply"],
        "Image analysis is currently unavailable. Please describe your symptoms in text for assistance."
    );
    assert!(body["image"].as_str().unwrap().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_signin_sets_token_cookies() {
    let backend = MockServer::start().await;
    let access = valid_token();
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "secret" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": access, "refresh": "refresh-1" })),
        )
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let response = server
        .post("/signin")
        .form(&[("email", "ada@example.com"), ("password", "secret")])
        .await;

    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let written = set_cookies(&response);
    assert!(written.iter().any(|c| c.starts_with(&format!("access_token={access}"))));
    assert!(written.iter().any(|c| c.contains("HttpOnly")));
}

#[tokio::test]
async fn test_signin_shows_backend_message() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "No active account found with the given credentials"
        })))
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let response = server
        .post("/signin")
        .form(&[("email", "ada@example.com"), ("password", "wrong")])
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(
        response
            .text()
            .contains("No active account found with the given credentials")
    );
}

#[tokio::test]
async fn test_signup_validation_keeps_form() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);

    let response = server
        .post("/signup")
        .form(&[
            ("username", "ada"),
            ("email", "ada@example.com"),
            ("password", "secret"),
            ("gender", ""),
        ])
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let html = response.text();
    assert!(html.contains("Please select your gender"));
    assert!(html.contains(r#"value="ada@example.com""#));
}

#[tokio::test]
async fn test_theme_toggle_sets_cookie() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);

    let response = server.post("/theme").await;
    assert_eq!(response.status_code(), StatusCode::SEE_OTHER);
    assert!(
        set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("theme=dark"))
    );
}

#[tokio::test]
async fn test_dashboard_renders_history_and_prompts() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 5, "message": "Feeling fatigued lately", "is_user": true, "timestamp": "2025-03-01T10:00:00Z" },
            { "id": 6, "message": "Try to rest.", "is_user": false, "timestamp": "2025-03-01T10:00:03Z" }
        ])))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/profile/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "ada@example.com",
            "full_name": "Ada Lovelace"
        })))
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let response = server.get("/").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let html = response.text();
    assert!(html.contains("Feeling fatigued lately"));
    assert!(html.contains("Ada Lovelace"));
    assert!(html.contains(r#"data-prompt="Tips for staying healthy""#));
}

#[tokio::test]
async fn test_records_are_cached_until_refresh_requested() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "message": "I have a fever", "is_user": true, "timestamp": "2025-03-01T10:00:00Z" }
        ])))
        .expect(2)
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    let first = server
        .get("/api/records")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(first["from_cache"], false);
    assert_eq!(first["messages"][0]["message"], "I have a fever");

    let second = server
        .get("/api/records")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(second["from_cache"], true);
    assert_eq!(second["messages"], first["messages"]);

    let forced = server
        .get("/api/records?refresh=true")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(forced["from_cache"], false);
}

#[tokio::test]
async fn test_save_history_posts_text_and_invalidates() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/history/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chatlog/"))
        .and(body_json(json!({ "message": "I have a cough", "is_user": true })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chatlog/"))
        .and(body_json(json!({ "message": "Try honey and rest.", "is_user": false })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let (name, value) = cookies(&valid_token(), "refresh");

    server
        .get("/api/history")
        .add_header(name.clone(), value.clone())
        .await;

    let response = server
        .post("/api/history")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "messages": [
                { "text": "I have a cough", "sender": "user" },
                { "image": "data:image/png;base64,AAAA", "sender": "user" },
                { "text": "Try honey and rest.", "sender": "bot" }
            ]
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    // The cached list was dropped, so this goes back to the backend.
    server.get("/api/history").add_header(name, value).await;
}

#[tokio::test]
async fn test_token_without_subject_is_rejected() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);
    let anonymous = make_token(&json!({ "exp": now() + 3600 }));
    let (name, value) = cookies(&anonymous, "refresh");

    let response = server.get("/api/history").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(
        set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("access_token=;") || c.starts_with("access_token=\"\""))
    );
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signin_refuses_token_without_subject() {
    let backend = MockServer::start().await;
    let anonymous = make_token(&json!({ "exp": now() + 3600 }));
    Mock::given(method("POST"))
        .and(path("/api/token/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": anonymous, "refresh": "refresh-1" })),
        )
        .mount(&backend)
        .await;

    let server = test_server(&backend);
    let response = server
        .post("/signin")
        .form(&[("email", "ada@example.com"), ("password", "secret")])
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(response.text().contains("Signin failed. Please try again."));
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_chat_with_expired_session_returns_expiry_message() {
    let backend = MockServer::start().await;
    let server = test_server(&backend);

    let response = server
        .post("/api/chat")
        .json(&json!({ "message": "hello" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.json::<Value>()["error"],
        "Your session has expired. Please login again."
    );
}
