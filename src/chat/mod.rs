//! Chat transcript, history and health-record services.
//!
//! - [`stream`]: progressive rendering of a streamed diagnosis
//! - [`history`]: grouping of the flat history into titled chat sessions
//! - [`records`]: cached access to the user's health records

pub mod history;
pub mod records;
pub mod stream;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use history::{ChatHistoryService, ChatSession};
pub use records::HealthRecordsService;
pub use stream::{StreamConsumer, Transcript};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One entry of the on-screen conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Text { text: String, sender: Sender },
    /// An uploaded image, as a data URL. Always sent by the user.
    Image { image: String, sender: Sender },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            sender: Sender::User,
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            sender: Sender::Bot,
        }
    }

    pub fn image(data_url: impl Into<String>) -> Self {
        Self::Image {
            image: data_url.into(),
            sender: Sender::User,
        }
    }

    pub fn sender(&self) -> Sender {
        match self {
            Self::Text { sender, .. } | Self::Image { sender, .. } => *sender,
        }
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// Fresh conversation id: `session_{unix ms}_{9 base-36 chars}`.
pub fn new_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();
    format!("session_{}_{suffix}", chrono::Utc::now().timestamp_millis())
}
