//! Chat messages relayed between sessions.

use chrono::{DateTime, Utc};

use crate::Name;

/// One line of chat, attributed to the session that sent it.
///
/// Built once per received line and never mutated afterwards; fields are
/// private so a broadcast always carries exactly what the sender typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Name,
    text: String,
    sent_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(sender: Name, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }

    /// Name of the sending session.
    pub fn sender(&self) -> &Name {
        &self.sender
    }

    /// Payload exactly as the client sent it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// When the server received the line.
    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }
}
