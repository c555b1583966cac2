//! Outbound message sinks.
//!
//! A `Sink` is the write side of one session's outbox: an unbounded FIFO
//! queue drained to the socket by that session's writer task. Delivering to
//! a sink only enqueues, so one slow or dead client never stalls a
//! broadcast to the others.

use std::sync::Arc;

use relay_core::SessionId;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// One pre-rendered protocol line (without the trailing newline).
pub type Line = Arc<str>;

/// Receiving end of a session's outbox.
pub type Outbox = mpsc::UnboundedReceiver<Line>;

/// Writable destination for one session's outbound lines.
///
/// Cheap to clone; the registry holds a clone but never owns the connection.
#[derive(Debug, Clone)]
pub struct Sink {
    owner: SessionId,
    sender: mpsc::UnboundedSender<Line>,
}

impl Sink {
    /// Creates a sink and the outbox its writer task drains.
    pub fn channel(owner: SessionId) -> (Self, Outbox) {
        let (sender, outbox) = mpsc::unbounded_channel();
        (Self { owner, sender }, outbox)
    }

    /// Session that owns this sink.
    pub fn owner(&self) -> SessionId {
        self.owner
    }

    /// Queues a line for delivery.
    ///
    /// Fails only once the owning session has closed its outbox.
    pub fn deliver(&self, line: Line) -> Result<(), SinkError> {
        self.sender
            .send(line)
            .map_err(|_| SinkError::Closed(self.owner))
    }

    /// Returns true if the outbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Errors from delivering to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink closed for {0}")]
    Closed(SessionId),
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of sinks in the snapshot
    pub recipients: usize,
    /// Sinks whose delivery failed
    pub failed: Vec<SessionId>,
}

impl BroadcastReport {
    /// Number of successful deliveries.
    pub fn delivered(&self) -> usize {
        self.recipients.saturating_sub(self.failed.len())
    }

    /// Returns true if every sink in the snapshot accepted the line.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers `line` to every sink, each attempt independent of the others.
///
/// Failed sinks are recorded, not removed: removal is the owning session's
/// job during teardown.
pub fn deliver_all(sinks: &[Sink], line: &Line) -> BroadcastReport {
    let mut report = BroadcastReport {
        recipients: sinks.len(),
        failed: Vec::new(),
    };

    for sink in sinks {
        if let Err(e) = sink.deliver(Arc::clone(line)) {
            debug!(session_id = %sink.owner(), error = %e, "Failed to deliver to sink");
            report.failed.push(sink.owner());
        }
    }

    report
}
