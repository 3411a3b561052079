//! Streaming chat, symptom diagnosis and image analysis.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, State},
    response::Response,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::Session;
use crate::backend::ByteStream;
use crate::chat::stream::{APOLOGY, SESSION_EXPIRED};
use crate::chat::{ChatMessage, StreamConsumer, Transcript, new_session_id};
use crate::error::{AppError, Result};
use crate::events::{StreamEvent, build_sse_response, sse_event};
use crate::uploads;

use super::history::invalidate_user_caches;

/// Request body for chat API.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message content.
    pub message: String,
    /// Conversation id; a new one is generated when missing.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Request body for the diagnosis API.
#[derive(Debug, Deserialize)]
pub struct DiagnoseRequest {
    /// Comma separated symptom names.
    pub symptoms: String,
}

/// POST /api/chat - Stream the assistant's reply to a message.
pub async fn api_chat(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ChatRequest>,
) -> Result<Response> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::field("message", "Please enter a message"));
    }
    let session_id = req
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_session_id);

    tracing::info!(
        subject = %session.subject,
        session_id = %session_id,
        chars = message.chars().count(),
        "Received chat request"
    );

    let upstream = state
        .api
        .chat()
        .stream_chat(&session.access_token, &message, &session_id)
        .await?;
    Ok(relay(state, session, message, session_id, upstream))
}

/// POST /api/diagnose - Stream a diagnosis for a list of symptoms.
pub async fn api_diagnose(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<DiagnoseRequest>,
) -> Result<Response> {
    let symptoms: Vec<&str> = req
        .symptoms
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if symptoms.is_empty() {
        return Err(AppError::field(
            "symptoms",
            "Please enter at least one symptom",
        ));
    }
    let prompt = symptoms.join(", ");

    tracing::info!(subject = %session.subject, count = symptoms.len(), "Received diagnosis request");

    let upstream = state
        .api
        .chat()
        .stream_diagnosis(&session.access_token, &prompt)
        .await?;
    Ok(relay(state, session, prompt, new_session_id(), upstream))
}

/// Relay an upstream reply as SSE, then drop the caches it made stale.
fn relay(
    state: AppState,
    session: Session,
    prompt: String,
    session_id: String,
    mut upstream: ByteStream,
) -> Response {
    let sse_stream = async_stream::stream! {
        yield Ok::<String, Infallible>(sse_event(&StreamEvent::StreamStart {
            session_id: session_id.clone(),
        }));

        let mut consumer = StreamConsumer::begin(Transcript::new(), prompt);
        let mut failure = None;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    let delta = consumer.push_chunk(&bytes);
                    if !delta.is_empty() {
                        yield Ok(sse_event(&StreamEvent::MessageDelta { text: delta }));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        received = consumer.reply().len(),
                        "Reply stream broke"
                    );
                    failure = Some(if matches!(e, AppError::Unauthorized) {
                        SESSION_EXPIRED
                    } else {
                        APOLOGY
                    });
                    break;
                }
            }
        }

        invalidate_user_caches(&state, &session.subject);

        match failure {
            Some(message) => {
                consumer.fail(message);
                yield Ok(sse_event(&StreamEvent::Error {
                    message: message.to_string(),
                    code: Some("stream_failed".to_string()),
                }));
            }
            None => {
                let transcript = consumer.finish();
                let text = transcript
                    .last()
                    .and_then(ChatMessage::text)
                    .unwrap_or_default()
                    .to_string();
                tracing::debug!(session_id = %session_id, chars = text.len(), "Reply complete");
                yield Ok(sse_event(&StreamEvent::Done { text }));
            }
        }
    };

    build_sse_response(Body::from_stream(sse_stream))
}

/// Response of the image analysis API.
#[derive(Debug, Serialize)]
pub struct ImageReply {
    /// Text to show as the assistant's reply.
    pub reply: String,
    /// The uploaded image as a `data:` URL for the transcript.
    pub image: String,
}

/// POST /api/image - Analyze an uploaded image.
pub async fn api_image(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> Result<Json<ImageReply>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let content_type = field.content_type().map(ToString::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        upload = Some(uploads::image_upload(
            &file_name,
            content_type.as_deref(),
            bytes,
        ));
        break;
    }

    let Some(upload) = upload else {
        return Err(AppError::field("image", "Please select an image file"));
    };
    uploads::validate_image(&upload, state.config.uploads.max_image_bytes)?;
    let image = uploads::data_url(&upload);

    let reply = uploads::analyze(
        &state.api,
        &session.access_token,
        upload,
        state.config.uploads.max_image_bytes,
    )
    .await?;
    invalidate_user_caches(&state, &session.subject);

    Ok(Json(ImageReply { reply, image }))
}
