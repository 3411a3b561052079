//! Error types shared by the backend client, the caches and the HTTP layer.

use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Transport-level failure talking to the health backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the backend.
        status: u16,
        /// User-facing message extracted from the response body.
        message: String,
    },

    /// The access token was rejected or could not be refreshed.
    #[error("Your session has expired. Please login again.")]
    Unauthorized,

    /// Form or payload validation failed.
    #[error("Validation failed")]
    Validation(BTreeMap<String, String>),

    /// The request itself is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Invalid backend URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local storage (cache or token file) failure.
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Build a validation error with a single field message.
    pub fn field(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(name.into(), message.into());
        Self::Validation(fields)
    }

    /// Status code the error maps to when returned from a handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Api { status, .. } if *status == 400 => StatusCode::BAD_REQUEST,
            Self::Http(_) | Self::Api { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidUrl(_) | Self::Json(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .filter_map(|(field, errs)| {
                errs.first().map(|e| {
                    let message = e
                        .message
                        .as_ref()
                        .map_or_else(|| format!("{field} is invalid"), ToString::to_string);
                    (field.to_string(), message)
                })
            })
            .collect();
        Self::Validation(fields)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = match self {
            Self::Validation(fields) => ErrorBody {
                error: format!(
                    "Please fix {} error{} before submitting",
                    fields.len(),
                    if fields.len() > 1 { "s" } else { "" }
                ),
                fields: Some(fields),
            },
            Self::Api { message, .. } => ErrorBody {
                error: message,
                fields: None,
            },
            other => ErrorBody {
                error: other.to_string(),
                fields: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
