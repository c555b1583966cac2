//! Server-to-client line types.

use std::fmt;
use std::str::FromStr;

use relay_core::{Message, Name};
use thiserror::Error;

/// Prompt asking the client for a display name.
pub const SUBMIT_NAME: &str = "SUBMITNAME";

/// Acknowledgement that the submitted name was claimed.
pub const NAME_ACCEPTED: &str = "NAMEACCEPTED";

/// Prefix of a relayed chat line (`MESSAGE <name>: <text>`).
pub const MESSAGE_PREFIX: &str = "MESSAGE ";

/// Separator between sender name and text in a chat line.
const SENDER_SEPARATOR: &str = ": ";

/// A line sent from the server to a client.
///
/// Rendering via `Display` never includes the trailing newline; the writer
/// appends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// `SUBMITNAME`, sent once per registration attempt
    SubmitName,

    /// `NAMEACCEPTED`, sent once on a successful claim
    NameAccepted,

    /// `MESSAGE <name>: <text>`, one per broadcast message
    Message {
        /// Sender's claimed name
        name: Name,
        /// Chat text, verbatim
        text: String,
    },
}

impl ServerLine {
    /// Creates a chat line from a relayed message.
    pub fn message(message: &Message) -> Self {
        Self::Message {
            name: message.sender().clone(),
            text: message.text().to_string(),
        }
    }
}

impl From<&Message> for ServerLine {
    fn from(message: &Message) -> Self {
        Self::message(message)
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubmitName => f.write_str(SUBMIT_NAME),
            Self::NameAccepted => f.write_str(NAME_ACCEPTED),
            Self::Message { name, text } => {
                write!(f, "{MESSAGE_PREFIX}{name}{SENDER_SEPARATOR}{text}")
            }
        }
    }
}

impl FromStr for ServerLine {
    type Err = ProtocolError;

    /// Parses a server line as a client would see it.
    ///
    /// The sender/text split happens at the first `": "`, so a name that
    /// itself contains `": "` cannot be recovered exactly.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        match line {
            SUBMIT_NAME => Ok(Self::SubmitName),
            NAME_ACCEPTED => Ok(Self::NameAccepted),
            _ => {
                let body = line
                    .strip_prefix(MESSAGE_PREFIX)
                    .ok_or_else(|| ProtocolError::UnknownLine(line.to_string()))?;

                let (name, text) = body
                    .split_once(SENDER_SEPARATOR)
                    .ok_or_else(|| ProtocolError::MissingSender(line.to_string()))?;

                Ok(Self::Message {
                    name: Name::new(name),
                    text: text.to_string(),
                })
            }
        }
    }
}

/// Errors from parsing server lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The line is none of the known server line shapes.
    #[error("unknown server line: {0:?}")]
    UnknownLine(String),

    /// A `MESSAGE` line without the `<name>: ` sender part.
    #[error("message line missing sender: {0:?}")]
    MissingSender(String),
}
