//! Relay Core - Shared types for the relay chat server
//!
//! This crate provides the core domain types shared between
//! the daemon (relayd) and the wire protocol (relay-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod message;
pub mod name;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use message::Message;
pub use name::Name;
pub use session::{SessionId, SessionState};
