//! Relay Protocol - Wire protocol for relay clients
//!
//! The relay speaks newline-delimited text. The server sends one of three
//! line shapes (see [`ServerLine`]); clients send raw lines whose meaning
//! depends on the session state (candidate name, then chat text).

pub mod line;

pub use line::{ProtocolError, ServerLine, MESSAGE_PREFIX, NAME_ACCEPTED, SUBMIT_NAME};
