//! HTTP client for the remote health backend.
//!
//! The backend owns token issuance, diagnosis, image analysis and chat
//! persistence; this module only speaks its HTTP contract.
//!
//! # Example
//!
//! ```rust,no_run
//! use health_assistant_web::backend::HealthApi;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HealthApi::new("http://localhost:8000")?;
//! let tokens = api.auth().obtain_token("me@example.com", "secret").await?;
//! let history = api.chat().history(&tokens.access).await?;
//! # Ok(())
//! # }
//! ```

mod types;

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use url::Url;

use crate::error::{AppError, Result};
use crate::profile::{ProfileUpdate, UserProfile};

pub use types::{
    ChatLogEntry, ImageUpload, ProfileUpdateResponse, RefreshedToken, RegisterRequest, TokenPair,
};
use types::{ChatLogRequest, ChatRequest, Credentials, DiagnoseRequest, RefreshRequest};

/// Incremental response body of a streamed diagnosis.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Client for the health backend API.
#[derive(Debug, Clone)]
pub struct HealthApi {
    base_url: Url,
    http: reqwest::Client,
}

impl HealthApi {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The backend root (e.g., "http://localhost:8000")
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a client whose requests give up after `timeout`.
    ///
    /// Streamed responses are bounded by the same timeout end to end.
    pub fn with_timeout(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(base_url, http)
    }

    /// Create a new client with a custom reqwest client.
    pub fn with_client(base_url: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        // A trailing slash makes `Url::join` append instead of replacing the last segment.
        let raw = base_url.as_ref().trim_end_matches('/');
        let base_url = Url::parse(&format!("{raw}/"))?;
        Ok(Self { base_url, http })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the token and registration endpoints.
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi { client: self }
    }

    /// Access the diagnosis and chat history endpoints.
    pub fn chat(&self) -> ChatApi<'_> {
        ChatApi { client: self }
    }

    /// Access the user profile endpoints.
    pub fn profile(&self) -> ProfileApi<'_> {
        ProfileApi { client: self }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Turn a non-success response into an [`AppError`].
    ///
    /// `keys` lists the JSON fields that may carry a user-facing message, in
    /// priority order; `fallback` is used when none is present.
    async fn check(
        response: reqwest::Response,
        keys: &[&str],
        fallback: &str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized);
        }

        let body = response.text().await.unwrap_or_default();
        let message = extract_message(&body, keys).unwrap_or_else(|| fallback.to_string());
        tracing::warn!(status = %status, message = %message, "Backend returned error status");
        Err(AppError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Pull the first present message out of a JSON error body.
///
/// A key may hold a string or an array of strings (`non_field_errors`).
pub(crate) fn extract_message(body: &str, keys: &[&str]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    keys.iter().find_map(|key| match value.get(*key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.first()?.as_str().map(ToString::to_string),
        _ => None,
    })
}

fn byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AppError::from)),
    )
}

// =============================================================================
// Auth API
// =============================================================================

/// Token issuance, refresh and registration.
#[derive(Debug)]
pub struct AuthApi<'a> {
    client: &'a HealthApi,
}

impl AuthApi<'_> {
    /// Exchange credentials for a token pair.
    pub async fn obtain_token(&self, email: &str, password: &str) -> Result<TokenPair> {
        let response = self
            .client
            .http
            .post(self.client.url("api/token/")?)
            .json(&Credentials { email, password })
            .send()
            .await?;

        // Bad credentials come back as 401 with a `detail` message.
        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: 401,
                message: extract_message(&body, &["non_field_errors", "detail"])
                    .unwrap_or_else(|| "Signin failed. Please try again.".to_string()),
            });
        }

        let response = HealthApi::check(
            response,
            &["non_field_errors", "detail"],
            "Signin failed. Please try again.",
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken> {
        let response = self
            .client
            .http
            .post(self.client.url("api/token/refresh/")?)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;
        let response = HealthApi::check(response, &["detail"], "Token refresh failed").await?;
        Ok(response.json().await?)
    }

    /// Create an account together with its health profile.
    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        let response = self
            .client
            .http
            .post(self.client.url("api/register/")?)
            .json(request)
            .send()
            .await?;
        HealthApi::check(
            response,
            &["message", "error"],
            "Signup failed. Please try again.",
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// Chat API
// =============================================================================

/// Diagnosis streams, image analysis and chat history.
#[derive(Debug)]
pub struct ChatApi<'a> {
    client: &'a HealthApi,
}

impl ChatApi<'_> {
    /// Send a free-text message and stream the assistant's reply.
    pub async fn stream_chat(
        &self,
        token: &str,
        message: &str,
        session_id: &str,
    ) -> Result<ByteStream> {
        let response = self
            .client
            .http
            .post(self.client.url("chat/")?)
            .bearer_auth(token)
            .json(&ChatRequest {
                message,
                session_id,
            })
            .send()
            .await?;
        let response =
            HealthApi::check(response, &["error", "detail"], "Failed to get response").await?;
        Ok(byte_stream(response))
    }

    /// Stream a diagnosis for a comma separated list of symptoms.
    pub async fn stream_diagnosis(&self, token: &str, symptoms: &str) -> Result<ByteStream> {
        let symptom_names = symptoms
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        let response = self
            .client
            .http
            .post(self.client.url("diagnose/")?)
            .bearer_auth(token)
            .json(&DiagnoseRequest { symptom_names })
            .send()
            .await?;
        let response =
            HealthApi::check(response, &["error", "detail"], "Failed to get response").await?;
        Ok(byte_stream(response))
    }

    /// Upload an image for analysis and return the full reply text.
    pub async fn diagnose_image(&self, token: &str, image: ImageUpload) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name)
            .mime_str(&image.content_type)?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .http
            .post(self.client.url("img-diagnose/")?)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let response =
            HealthApi::check(response, &["error", "detail"], "Image analysis failed").await?;
        Ok(response.text().await?)
    }

    /// Fetch the user's flat chat history, oldest first.
    pub async fn history(&self, token: &str) -> Result<Vec<ChatLogEntry>> {
        let response = self
            .client
            .http
            .get(self.client.url("chat/history/")?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = HealthApi::check(response, &["detail"], "Failed to load history").await?;
        Ok(response.json().await?)
    }

    /// Persist one chat message.
    pub async fn save_log(&self, token: &str, message: &str, is_user: bool) -> Result<()> {
        let response = self
            .client
            .http
            .post(self.client.url("api/chatlog/")?)
            .bearer_auth(token)
            .json(&ChatLogRequest { message, is_user })
            .send()
            .await?;
        HealthApi::check(response, &["detail"], "Failed to save chat").await?;
        Ok(())
    }

    /// Delete a chat by the id of its opening message.
    pub async fn delete(&self, token: &str, chat_id: &str) -> Result<()> {
        let response = self
            .client
            .http
            .delete(self.client.url(&format!("chat/delete/{chat_id}/"))?)
            .bearer_auth(token)
            .send()
            .await?;
        HealthApi::check(response, &["detail"], "Failed to delete chat").await?;
        Ok(())
    }
}

// =============================================================================
// Profile API
// =============================================================================

/// The signed-in user's health profile.
#[derive(Debug)]
pub struct ProfileApi<'a> {
    client: &'a HealthApi,
}

impl ProfileApi<'_> {
    /// Fetch the profile.
    pub async fn get(&self, token: &str) -> Result<UserProfile> {
        let response = self
            .client
            .http
            .get(self.client.url("user/profile/")?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = HealthApi::check(response, &["detail"], "Failed to load profile").await?;
        Ok(response.json().await?)
    }

    /// Replace the editable profile fields.
    pub async fn update(&self, token: &str, update: &ProfileUpdate) -> Result<ProfileUpdateResponse> {
        let response = self
            .client
            .http
            .put(self.client.url("user/profile/")?)
            .bearer_auth(token)
            .json(update)
            .send()
            .await?;
        let response =
            HealthApi::check(response, &["detail", "error"], "Failed to update profile").await?;
        Ok(response.json().await?)
    }
}
