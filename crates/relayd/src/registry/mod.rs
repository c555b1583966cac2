//! Name and sink registry using Actor pattern.
//!
//! The registry is the only state shared between sessions: the set of
//! claimed names and the set of sinks that receive broadcasts. It receives
//! commands via a tokio mpsc channel and is the canonical source of truth
//! for both.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │    Sessions     │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   RelayEvent          │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    Claim/Release          HashMap<Name,            Observers
//!    Add/Remove sink        SessionId> + sinks
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;
mod sink;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RelayEvent};
pub use handle::RegistryHandle;
pub use sink::{deliver_all, BroadcastReport, Line, Outbox, Sink, SinkError};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Returns a RegistryHandle for client use
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///
///     let names = handle.snapshot_names().await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
