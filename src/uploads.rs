//! Image uploads for analysis.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::backend::{HealthApi, ImageUpload};
use crate::error::{AppError, Result};

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Reply used when the backend cannot analyze images at all.
pub const ANALYSIS_UNAVAILABLE: &str =
    "Image analysis is currently unavailable. Please describe your symptoms in text for assistance.";

/// Reply used when the analysis request failed.
pub const ANALYSIS_FAILED: &str =
    "I couldn't analyze your image. Please describe your symptoms in text instead.";

/// Marker the backend puts in front of an analysis it could not perform.
const ERROR_MARKER: &str = "[Error]";

/// Build an upload, guessing the content type from the file name when the
/// client did not send a usable one.
pub fn image_upload(file_name: &str, content_type: Option<&str>, bytes: Bytes) -> ImageUpload {
    let content_type = content_type
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        .map(ToString::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
    ImageUpload {
        file_name: file_name.to_string(),
        content_type,
        bytes,
    }
}

/// Read an image from disk.
pub async fn load_image(path: &Path) -> Result<ImageUpload> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image");
    Ok(image_upload(file_name, None, Bytes::from(bytes)))
}

/// Reject non-images and anything larger than `max_bytes`.
pub fn validate_image(upload: &ImageUpload, max_bytes: usize) -> Result<()> {
    if !upload.content_type.starts_with("image/") {
        return Err(AppError::field("image", "Please select an image file"));
    }
    if upload.bytes.len() > max_bytes {
        return Err(AppError::field("image", "Image size should be less than 5MB"));
    }
    Ok(())
}

/// `data:` URL used to show the upload in the transcript.
pub fn data_url(upload: &ImageUpload) -> String {
    format!(
        "data:{};base64,{}",
        upload.content_type,
        STANDARD.encode(&upload.bytes)
    )
}

/// Turn the outcome of an analysis request into the text shown to the user.
///
/// Only a rejected session is still an error; every other failure becomes a
/// polite reply.
pub fn reply_text(outcome: Result<String>) -> Result<String> {
    match outcome {
        Ok(text) if text.trim_start().starts_with(ERROR_MARKER) => {
            tracing::warn!(reply = %text.trim(), "Image analysis not supported by backend");
            Ok(ANALYSIS_UNAVAILABLE.to_string())
        }
        Ok(text) => Ok(text),
        Err(AppError::Unauthorized) => Err(AppError::Unauthorized),
        Err(e) => {
            tracing::error!(error = %e, "Image analysis error");
            Ok(ANALYSIS_FAILED.to_string())
        }
    }
}

/// Validate `upload`, send it for analysis and return the reply text.
pub async fn analyze(
    api: &HealthApi,
    token: &str,
    upload: ImageUpload,
    max_bytes: usize,
) -> Result<String> {
    validate_image(&upload, max_bytes)?;
    tracing::info!(
        file = %upload.file_name,
        content_type = %upload.content_type,
        bytes = upload.bytes.len(),
        "Submitting image for analysis"
    );
    reply_text(api.chat().diagnose_image(token, upload).await)
}
