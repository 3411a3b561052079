//! Wire types of the health backend's HTTP contract.

use serde::{Deserialize, Serialize};

/// Access/refresh pair issued by `POST /api/token/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Response of `POST /api/token/refresh/`.
///
/// The backend only rotates the refresh token when configured to do so.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedToken {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Credentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Body of `POST /api/register/`.
///
/// Optional numeric fields are sent as `null` when the form left them blank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub age: Option<u32>,
    pub gender: String,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub blood_group: String,
    pub allergies: String,
}

/// One row of the flat chat history returned by `GET /chat/history/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub id: i64,
    pub message: String,
    pub is_user: bool,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub message: &'a str,
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiagnoseRequest {
    pub symptom_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatLogRequest<'a> {
    pub message: &'a str,
    pub is_user: bool,
}

/// Image sent to `POST /img-diagnose/`.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: bytes::Bytes,
}

/// Response of `PUT /user/profile/`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdateResponse {
    #[serde(default)]
    pub user: Option<crate::profile::UserProfile>,
}
