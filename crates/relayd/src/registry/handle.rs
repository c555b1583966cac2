//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to relay events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::sync::Arc;

use relay_core::{Message, Name, SessionId};
use relay_protocol::ServerLine;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use super::commands::{RegistryCommand, RegistryError, RelayEvent};
use super::sink::{deliver_all, BroadcastReport, Line, Sink};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// if handle.try_claim(Name::from("alice"), session_id).await? {
///     handle.add_sink(sink).await?;
///     handle.broadcast(Message::new(Name::from("alice"), "hi")).await?;
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RelayEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RelayEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Atomically claim `name` for `owner`.
    ///
    /// Returns `Ok(true)` if the name was free and is now held by `owner`,
    /// `Ok(false)` if another session holds it (the registry is unchanged).
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn try_claim(&self, name: Name, owner: SessionId) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::TryClaim {
                name,
                owner,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Release `name` if `owner` holds it; no-op otherwise.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn release(&self, name: Name, owner: SessionId) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Release {
                name,
                owner,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Add a sink to the broadcast set. Idempotent.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn add_sink(&self, sink: Sink) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::AddSink {
                sink,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Remove a session's sink from the broadcast set. Idempotent.
    ///
    /// Once this returns, no later broadcast snapshot contains the sink.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove_sink(&self, session_id: SessionId) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::RemoveSink {
                session_id,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Get all claimed names, sorted.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn snapshot_names(&self) -> Vec<Name> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::SnapshotNames { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Broadcast a message to every sink registered at the moment of the call.
    ///
    /// The line is rendered once. The actor hands back a snapshot of the
    /// sink set and delivery happens here, one independent attempt per
    /// sink: a failed sink is reported and skipped, never removed.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn broadcast(&self, message: Message) -> Result<BroadcastReport, RegistryError> {
        let line: Line = Arc::from(ServerLine::message(&message).to_string());
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Broadcast {
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        let sinks = rx.await.map_err(|_| RegistryError::ChannelClosed)?;
        Ok(deliver_all(&sinks, &line))
    }

    /// Get the number of registered sinks.
    ///
    /// Returns 0 if communication with the actor fails.
    pub async fn sink_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::SinkCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    /// Fire-and-forget release, usable from synchronous contexts like `Drop`.
    pub fn release_detached(&self, name: Name, owner: SessionId) {
        self.send_detached(RegistryCommand::Release {
            name,
            owner,
            respond_to: None,
        });
    }

    /// Fire-and-forget sink removal, usable from synchronous contexts like `Drop`.
    pub fn remove_sink_detached(&self, session_id: SessionId) {
        self.send_detached(RegistryCommand::RemoveSink {
            session_id,
            respond_to: None,
        });
    }

    /// Queues a command without waiting.
    ///
    /// Falls back to a spawned send when the command buffer is full; gives up
    /// only if the actor is gone or no runtime is available.
    fn send_detached(&self, cmd: RegistryCommand) {
        match self.sender.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                // Actor stopped - nothing left to clean up
            }
            Err(TrySendError::Full(cmd)) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        let _ = sender.send(cmd).await;
                    });
                }
                Err(_) => {
                    warn!("Registry command buffer full and no runtime, dropping cleanup command");
                }
            },
        }
    }

    /// Subscribe to relay events.
    ///
    /// Returns a broadcast receiver that will receive all events (joins,
    /// departures, messages) published by the registry actor.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
        // Compiles = test passes
    }

    #[tokio::test]
    async fn test_try_claim_sends_command() {
        let (handle, mut rx) = create_test_handle();

        // Spawn task to handle the command
        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::TryClaim {
                name,
                owner,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(name.as_str(), "alice");
                assert_eq!(owner, SessionId::new(9));
                let _ = respond_to.send(true);
                return true;
            }
            false
        });

        let result = handle.try_claim(Name::from("alice"), SessionId::new(9)).await;
        assert_eq!(result, Ok(true));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_try_claim_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx); // Close the channel

        let result = handle.try_claim(Name::from("alice"), SessionId::new(1)).await;
        assert_eq!(result, Err(RegistryError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_snapshot_names_returns_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.snapshot_names().await.is_empty());
        assert_eq!(handle.sink_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_rendered_line_to_snapshot() {
        let (handle, mut rx) = create_test_handle();
        let (sink, mut outbox) = Sink::channel(SessionId::new(1));

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Broadcast { respond_to, .. }) = rx.recv().await {
                let _ = respond_to.send(vec![sink]);
            }
        });

        let report = handle
            .broadcast(Message::new(Name::from("alice"), "hi"))
            .await
            .unwrap();
        cmd_handler.await.unwrap();

        assert_eq!(report.recipients, 1);
        assert!(report.is_complete());
        assert_eq!(outbox.recv().await.as_deref(), Some("MESSAGE alice: hi"));
    }

    #[tokio::test]
    async fn test_detached_commands_have_no_responder() {
        let (handle, mut rx) = create_test_handle();

        handle.remove_sink_detached(SessionId::new(4));
        handle.release_detached(Name::from("alice"), SessionId::new(4));

        assert!(matches!(
            rx.recv().await,
            Some(RegistryCommand::RemoveSink {
                respond_to: None,
                ..
            })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(RegistryCommand::Release {
                respond_to: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_detached_commands_survive_full_buffer() {
        let (cmd_tx, mut rx) = mpsc::channel(1);
        let (event_tx, _event_rx) = broadcast::channel(1);
        let handle = RegistryHandle::new(cmd_tx, event_tx);

        handle.remove_sink_detached(SessionId::new(1));
        // Buffer is full now; this one goes through a spawned send
        handle.remove_sink_detached(SessionId::new(2));

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let Some(RegistryCommand::RemoveSink { session_id, .. }) = rx.recv().await {
                seen.push(session_id);
            }
        }
        assert_eq!(seen, vec![SessionId::new(1), SessionId::new(2)]);
    }

    #[tokio::test]
    async fn test_detached_commands_ignore_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle.release_detached(Name::from("alice"), SessionId::new(1));
        handle.remove_sink_detached(SessionId::new(1));
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let _subscriber = handle.subscribe();
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();
        assert!(handle.is_connected());

        drop(rx);
        assert!(!handle.is_connected());
    }
}
