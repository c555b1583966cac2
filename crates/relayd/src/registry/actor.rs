//! Registry actor - owns all name claims and sinks and processes commands.
//!
//! The RegistryActor is the single owner of shared relay state. It receives
//! commands via an mpsc channel and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use relay_core::{Message, Name, SessionId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::commands::{RegistryCommand, RelayEvent};
use super::sink::Sink;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all claimed names and registered sinks.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to observers.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially, so
/// a claim's check-and-insert is atomic and a broadcast snapshot never sees
/// the sink set mid-mutation.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Claimed name → owning session. Keys are unique.
    claims: HashMap<Name, SessionId>,

    /// Sessions past the handshake → their outbound sink.
    sinks: HashMap<SessionId, Sink>,

    /// Event publisher for observers
    event_publisher: broadcast::Sender<RelayEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RelayEvent>,
    ) -> Self {
        Self {
            receiver,
            claims: HashMap::new(),
            sinks: HashMap::new(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            names = self.claims.len(),
            sinks = self.sinks.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::TryClaim {
                name,
                owner,
                respond_to,
            } => {
                let result = self.handle_try_claim(name, owner);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Release {
                name,
                owner,
                respond_to,
            } => {
                self.handle_release(name, owner);
                if let Some(tx) = respond_to {
                    let _ = tx.send(());
                }
            }
            RegistryCommand::AddSink { sink, respond_to } => {
                self.handle_add_sink(sink);
                let _ = respond_to.send(());
            }
            RegistryCommand::RemoveSink {
                session_id,
                respond_to,
            } => {
                self.handle_remove_sink(session_id);
                if let Some(tx) = respond_to {
                    let _ = tx.send(());
                }
            }
            RegistryCommand::SnapshotNames { respond_to } => {
                let _ = respond_to.send(self.sorted_names());
            }
            RegistryCommand::Broadcast {
                message,
                respond_to,
            } => {
                let snapshot = self.handle_broadcast(message);
                let _ = respond_to.send(snapshot);
            }
            RegistryCommand::SinkCount { respond_to } => {
                let _ = respond_to.send(self.sinks.len());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Claims `name` for `owner` if nobody holds it.
    fn handle_try_claim(&mut self, name: Name, owner: SessionId) -> bool {
        match self.claims.entry(name) {
            Entry::Occupied(entry) => {
                debug!(
                    name = %entry.key(),
                    session_id = %owner,
                    held_by = %entry.get(),
                    "Name already claimed, rejecting"
                );
                false
            }
            Entry::Vacant(entry) => {
                let name = entry.key().clone();
                entry.insert(owner);

                info!(
                    name = %name,
                    session_id = %owner,
                    total_names = self.claims.len(),
                    "Name claimed"
                );

                // Publish event (ignore if no subscribers)
                let _ = self.event_publisher.send(RelayEvent::Joined {
                    name,
                    names: self.sorted_names(),
                });
                true
            }
        }
    }

    /// Releases `name` if `owner` holds it.
    fn handle_release(&mut self, name: Name, owner: SessionId) {
        match self.claims.get(&name).copied() {
            Some(holder) if holder == owner => {
                self.claims.remove(&name);

                info!(
                    name = %name,
                    session_id = %owner,
                    total_names = self.claims.len(),
                    "Name released"
                );

                let _ = self.event_publisher.send(RelayEvent::Left {
                    name,
                    names: self.sorted_names(),
                });
            }
            Some(holder) => {
                debug!(
                    name = %name,
                    session_id = %owner,
                    held_by = %holder,
                    "Release for name held by another session, ignoring"
                );
            }
            None => {
                debug!(name = %name, session_id = %owner, "Release for unclaimed name, ignoring");
            }
        }
    }

    /// Adds a sink to the broadcast set.
    fn handle_add_sink(&mut self, sink: Sink) {
        let session_id = sink.owner();
        if self.sinks.insert(session_id, sink).is_some() {
            debug!(session_id = %session_id, "Sink re-registered, replaced previous");
        } else {
            debug!(
                session_id = %session_id,
                total_sinks = self.sinks.len(),
                "Sink registered"
            );
        }
    }

    /// Removes a sink from the broadcast set.
    fn handle_remove_sink(&mut self, session_id: SessionId) {
        if self.sinks.remove(&session_id).is_some() {
            debug!(
                session_id = %session_id,
                total_sinks = self.sinks.len(),
                "Sink removed"
            );
        }
    }

    /// Takes the sink snapshot for one message and publishes it to observers.
    fn handle_broadcast(&mut self, message: Message) -> Vec<Sink> {
        let snapshot: Vec<Sink> = self.sinks.values().cloned().collect();

        debug!(
            sender = %message.sender(),
            recipients = snapshot.len(),
            "Broadcast snapshot taken"
        );

        let _ = self.event_publisher.send(RelayEvent::Message(message));
        snapshot
    }

    /// Returns all claimed names, sorted.
    fn sorted_names(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self.claims.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of claimed names (for testing).
    #[cfg(test)]
    pub fn name_count(&self) -> usize {
        self.claims.len()
    }
}
