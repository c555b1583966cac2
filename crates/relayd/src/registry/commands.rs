//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RelayEvent`: Events published by the registry for observers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use relay_core::{Message, Name, SessionId};
use thiserror::Error;
use tokio::sync::oneshot;

use super::sink::Sink;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking. Teardown
/// commands take an optional responder so they can also be sent
/// fire-and-forget from a `Drop` impl.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Claim a name for a session.
    ///
    /// Responds `true` if the name was free and is now owned by `owner`,
    /// `false` (with no side effect) if another session holds it.
    TryClaim {
        /// Candidate name, verbatim from the client
        name: Name,
        /// Session that wants the name
        owner: SessionId,
        /// Channel to send the result
        respond_to: oneshot::Sender<bool>,
    },

    /// Release a claimed name.
    ///
    /// No-op if the name is not claimed or is held by a different session.
    Release {
        /// Name to release
        name: Name,
        /// Session releasing it
        owner: SessionId,
        /// Acknowledgement channel (None = fire-and-forget)
        respond_to: Option<oneshot::Sender<()>>,
    },

    /// Add a session's sink to the broadcast set.
    ///
    /// Idempotent: re-adding replaces the previous sink for that session.
    AddSink {
        /// The sink to register
        sink: Sink,
        /// Acknowledgement channel
        respond_to: oneshot::Sender<()>,
    },

    /// Remove a session's sink from the broadcast set.
    ///
    /// Idempotent: removing an absent sink is a no-op.
    RemoveSink {
        /// Owner of the sink to remove
        session_id: SessionId,
        /// Acknowledgement channel (None = fire-and-forget)
        respond_to: Option<oneshot::Sender<()>>,
    },

    /// Get the currently claimed names, sorted.
    SnapshotNames {
        /// Channel to send the results
        respond_to: oneshot::Sender<Vec<Name>>,
    },

    /// Snapshot the broadcast set for one message.
    ///
    /// The actor only takes the snapshot and publishes the event; delivery
    /// happens in the caller, outside the actor.
    Broadcast {
        /// The message being relayed
        message: Message,
        /// Channel to send the sink snapshot
        respond_to: oneshot::Sender<Vec<Sink>>,
    },

    /// Get the number of registered sinks.
    SinkCount {
        /// Channel to send the result
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The command or response channel was closed.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Relay Events
// ============================================================================

/// Events published by the registry to observers.
///
/// Name lists are captured inside the actor at the moment of the change, so
/// each event carries a consistent view of who is in the room.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A session claimed a name and joined the room.
    Joined {
        /// The newly claimed name
        name: Name,
        /// All claimed names after the join, sorted
        names: Vec<Name>,
    },

    /// A session released its name and left the room.
    Left {
        /// The released name
        name: Name,
        /// All claimed names after the departure, sorted
        names: Vec<Name>,
    },

    /// A message was broadcast.
    Message(Message),
}
