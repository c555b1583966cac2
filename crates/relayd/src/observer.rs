//! Observer capability for room activity.
//!
//! Anything that wants to watch the room (a status display, an audit log)
//! implements [`RelayObserver`] and is driven by [`spawn_observer`], which
//! follows the registry's event stream. The relay itself never depends on
//! an observer being present.

use std::sync::Arc;

use relay_core::{Message, Name};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{RegistryHandle, RelayEvent};

/// Receives room activity notifications.
///
/// Every method defaults to a no-op; implement only what you need.
/// Callbacks run on the observer task, so they should not block.
pub trait RelayObserver: Send + Sync {
    /// A session claimed `name`.
    fn on_join(&self, _name: &Name) {}

    /// The session holding `name` went away.
    fn on_leave(&self, _name: &Name) {}

    /// A message was broadcast.
    fn on_message(&self, _message: &Message) {}

    /// The set of claimed names changed; `names` is sorted.
    fn on_user_list_changed(&self, _names: &[Name]) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RelayObserver for NoopObserver {}

/// Observer that writes room activity to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl RelayObserver for LogObserver {
    fn on_join(&self, name: &Name) {
        info!(name = %name, "{name} joined the chat");
    }

    fn on_leave(&self, name: &Name) {
        info!(name = %name, "{name} has left the chat");
    }

    fn on_message(&self, message: &Message) {
        info!(
            sender = %message.sender(),
            sent_at = %message.sent_at().format("%H:%M:%S"),
            "{}: {}",
            message.sender(),
            message.text()
        );
    }

    fn on_user_list_changed(&self, names: &[Name]) {
        let users: Vec<&str> = names.iter().map(Name::as_str).collect();
        info!(count = users.len(), users = ?users, "User list changed");
    }
}

/// Dispatches one registry event to an observer.
pub fn dispatch(observer: &dyn RelayObserver, event: &RelayEvent) {
    match event {
        RelayEvent::Joined { name, names } => {
            observer.on_join(name);
            observer.on_user_list_changed(names);
        }
        RelayEvent::Left { name, names } => {
            observer.on_leave(name);
            observer.on_user_list_changed(names);
        }
        RelayEvent::Message(message) => observer.on_message(message),
    }
}

/// Spawns a task that feeds registry events to `observer`.
///
/// Subscribes before returning, so every event published after this call
/// is seen. Runs until cancelled or until the registry shuts down. If the
/// observer falls behind, skipped events are logged and dropped.
pub fn spawn_observer(
    registry: &RegistryHandle,
    observer: Arc<dyn RelayObserver>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let mut event_rx = registry.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Observer shutting down");
                    break;
                }

                result = event_rx.recv() => {
                    match result {
                        Ok(event) => dispatch(observer.as_ref(), &event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Observer lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    })
}
