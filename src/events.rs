//! Server-sent events relayed to the browser while a reply streams in.
//!
//! # Example
//!
//! ```rust
//! use health_assistant_web::events::{StreamEvent, sse_event};
//!
//! let event = StreamEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.starts_with("event: message.delta\n"));
//! ```

use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum StreamEvent {
    /// The backend accepted the request.
    #[serde(rename = "stream.start")]
    StreamStart { session_id: String },

    /// Text to append to the reply.
    #[serde(rename = "message.delta")]
    MessageDelta { text: String },

    /// The reply failed; `message` replaces whatever was shown so far.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The reply is complete. Carries the full text.
    #[serde(rename = "done")]
    Done { text: String },
}

/// Format an event as an SSE frame with `event:` and `data:` lines.
pub fn sse_event(evt: &StreamEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });
    format!("event: {}\ndata: {json}\n\n", event_name(evt))
}

pub fn event_name(evt: &StreamEvent) -> &'static str {
    match evt {
        StreamEvent::StreamStart { .. } => "stream.start",
        StreamEvent::MessageDelta { .. } => "message.delta",
        StreamEvent::Error { .. } => "error",
        StreamEvent::Done { .. } => "done",
    }
}

/// Wrap an SSE body with headers that keep proxies from buffering it.
pub fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    h.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}
