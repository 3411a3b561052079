//! Progressive rendering of a streamed assistant reply.
//!
//! The backend answers diagnosis requests with a plain-text body delivered in
//! arbitrary chunks. [`StreamConsumer`] appends each decoded chunk to the last
//! (bot) message of a [`Transcript`]. Chunk boundaries may split a multi-byte
//! character; such bytes are held back until the character is complete.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{AppError, Result};

use super::{ChatMessage, Sender};

/// Shown in place of a reply that failed mid-way.
pub const APOLOGY: &str =
    "I apologize, but I'm having trouble responding right now. Please try again.";

/// Shown when the backend rejected the session.
pub const SESSION_EXPIRED: &str = "Your session has expired. Please login again.";

/// The on-screen conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Append `delta` to the last message, which must be a bot text message.
    fn append_to_last(&mut self, delta: &str) {
        match self.messages.last_mut() {
            Some(ChatMessage::Text {
                text,
                sender: Sender::Bot,
            }) => text.push_str(delta),
            _ => self.messages.push(ChatMessage::bot(delta)),
        }
    }

    fn replace_last(&mut self, message: ChatMessage) {
        match self.messages.last_mut() {
            Some(last) => *last = message,
            None => self.messages.push(message),
        }
    }
}

/// Incremental UTF-8 decoder.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    ///
    /// Invalid sequences become U+FFFD; an incomplete trailing sequence is
    /// kept for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Drives one streamed reply into a [`Transcript`].
#[derive(Debug)]
pub struct StreamConsumer {
    transcript: Transcript,
    decoder: Utf8Decoder,
}

impl StreamConsumer {
    /// Add the user's message and an empty bot message to fill.
    pub fn begin(mut transcript: Transcript, user_text: impl Into<String>) -> Self {
        transcript.push(ChatMessage::user(user_text));
        transcript.push(ChatMessage::bot(""));
        Self {
            transcript,
            decoder: Utf8Decoder::new(),
        }
    }

    /// Append one chunk and return the text it contributed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> String {
        let delta = self.decoder.decode(chunk);
        if !delta.is_empty() {
            self.transcript.append_to_last(&delta);
        }
        delta
    }

    /// Text of the reply so far.
    pub fn reply(&self) -> &str {
        self.transcript
            .last()
            .and_then(ChatMessage::text)
            .unwrap_or_default()
    }

    /// Complete the reply and hand the transcript back.
    pub fn finish(mut self) -> Transcript {
        let tail = self.decoder.finish();
        if !tail.is_empty() {
            self.transcript.append_to_last(&tail);
        }
        self.transcript
    }

    /// Replace the partial reply with `message` and hand the transcript back.
    pub fn fail(mut self, message: &str) -> Transcript {
        self.transcript.replace_last(ChatMessage::bot(message));
        self.transcript
    }

    /// Consume `stream` to the end, calling `on_delta` for each decoded piece.
    ///
    /// On a transport error the partial reply is replaced with [`APOLOGY`] (or
    /// [`SESSION_EXPIRED`]) and the error is returned alongside the transcript.
    pub async fn consume<S, F>(mut self, stream: S, mut on_delta: F) -> (Transcript, Result<()>)
    where
        S: Stream<Item = Result<Bytes>>,
        F: FnMut(&str),
    {
        futures::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    let delta = self.push_chunk(&bytes);
                    if !delta.is_empty() {
                        on_delta(&delta);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, received = self.reply().len(), "Reply stream broke");
                    let message = if matches!(e, AppError::Unauthorized) {
                        SESSION_EXPIRED
                    } else {
                        APOLOGY
                    };
                    return (self.fail(message), Err(e));
                }
            }
        }

        let tail = self.decoder.finish();
        if !tail.is_empty() {
            self.transcript.append_to_last(&tail);
            on_delta(&tail);
        }
        (self.transcript, Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_append_to_last_message() {
        let mut consumer = StreamConsumer::begin(Transcript::new(), "I have a headache");
        assert_eq!(consumer.push_chunk(b"Drink "), "Drink ");
        assert_eq!(consumer.push_chunk(b"water."), "water.");
        assert_eq!(consumer.reply(), "Drink water.");

        let transcript = consumer.finish();
        assert_eq!(
            transcript.messages(),
            &[
                ChatMessage::user("I have a headache"),
                ChatMessage::bot("Drink water.")
            ]
        );
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "fièvre".as_bytes();
        // 'è' is two bytes; split between them.
        let mut consumer = StreamConsumer::begin(Transcript::new(), "q");
        assert_eq!(consumer.push_chunk(&bytes[..3]), "fi");
        assert_eq!(consumer.push_chunk(&bytes[3..]), "èvre");
        assert_eq!(consumer.finish().last(), Some(&ChatMessage::bot("fièvre")));
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe2\x82"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_fail_replaces_partial_reply() {
        let mut consumer = StreamConsumer::begin(Transcript::new(), "q");
        consumer.push_chunk(b"partial");
        let transcript = consumer.fail(APOLOGY);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last(), Some(&ChatMessage::bot(APOLOGY)));
    }

    #[tokio::test]
    async fn test_consume_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"Rest ")),
            Ok(Bytes::from_static(b"and ")),
            Ok(Bytes::from_static(b"hydrate.")),
        ];
        let mut seen = Vec::new();
        let (transcript, result) = StreamConsumer::begin(Transcript::new(), "q")
            .consume(futures::stream::iter(chunks), |d| seen.push(d.to_string()))
            .await;

        assert!(result.is_ok());
        assert_eq!(seen, vec!["Rest ", "and ", "hydrate."]);
        assert_eq!(transcript.last(), Some(&ChatMessage::bot("Rest and hydrate.")));
    }

    #[tokio::test]
    async fn test_consume_error_mid_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"Half")),
            Err(AppError::Unauthorized),
        ];
        let (transcript, result) = StreamConsumer::begin(Transcript::new(), "q")
            .consume(futures::stream::iter(chunks), |_| {})
            .await;

        assert!(matches!(result, Err(AppError::Unauthorized)));
        assert_eq!(transcript.last(), Some(&ChatMessage::bot(SESSION_EXPIRED)));
    }
}
