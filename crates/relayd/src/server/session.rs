//! Session handler for individual client connections.
//!
//! Each client connection gets its own `Session` that:
//! - Prompts for a display name until it claims an unused one
//! - Registers its sink so it receives every broadcast
//! - Relays each received line to the whole room
//! - Tears down its registry entries on every exit path
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::fmt;
use std::sync::Arc;

use relay_core::{DomainError, Message, Name, SessionId, SessionState};
use relay_protocol::ServerLine;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{Outbox, RegistryError, RegistryHandle, Sink};

/// One connected client.
///
/// Owns the inbound line reader and the sink feeding its writer task. The
/// registry only ever holds a clone of the sink.
///
/// Teardown runs at the end of [`Session::run`]. If the session is dropped
/// before that (task aborted, panic, runtime shutdown) the `Drop` impl sends
/// the same cleanup to the registry without waiting for it.
pub struct Session<R> {
    /// Identifier assigned by the listener
    id: SessionId,

    /// Inbound bytes from the client
    reader: BufReader<R>,

    /// Outbound queue drained by the writer task; `None` once torn down
    sink: Option<Sink>,

    /// Handle to the shared registry
    registry: RegistryHandle,

    /// Current lifecycle state
    state: SessionState,

    /// Name this session holds (or is in the middle of claiming)
    name: Option<Name>,

    /// Whether the sink is in the broadcast set
    sink_registered: bool,

    /// Stops the writer task without draining (abnormal exit only)
    closed: CancellationToken,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Creates a session over an accepted connection.
    ///
    /// Spawns the writer task that drains the session's sink into `writer`,
    /// so this must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier assigned by the listener
    /// * `reader` - Read half of the connection
    /// * `writer` - Write half of the connection
    /// * `registry` - Handle to the shared registry
    pub fn new<W>(id: SessionId, reader: R, writer: W, registry: RegistryHandle) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, outbox) = Sink::channel(id);
        let closed = CancellationToken::new();

        tokio::spawn(write_outbox(id, writer, outbox, closed.clone()));

        Self {
            id,
            reader: BufReader::new(reader),
            sink: Some(sink),
            registry,
            state: SessionState::Connecting,
            name: None,
            sink_registered: false,
            closed,
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion.
    ///
    /// Negotiates a name, relays messages until the client goes away, then
    /// tears down. Returns why the session closed; errors never propagate
    /// past this point.
    pub async fn run(mut self) -> CloseReason {
        debug!(session_id = %self.id, "New client connected");

        let reason = match self.drive().await {
            Ok(()) => CloseReason::EndOfStream,
            Err(e) => CloseReason::Fault(e),
        };

        self.teardown().await;

        match &reason {
            CloseReason::EndOfStream => {
                info!(session_id = %self.id, "Client disconnected");
            }
            CloseReason::Fault(e) => {
                warn!(session_id = %self.id, error = %e, "Client session failed");
            }
        }

        reason
    }

    /// The handshake and message loop.
    ///
    /// `Ok(())` means the client reached end-of-stream.
    async fn drive(&mut self) -> Result<(), SessionError> {
        self.enter(SessionState::AwaitName)?;

        let name = match self.negotiate_name().await? {
            Some(name) => name,
            None => return Ok(()),
        };

        self.enter(SessionState::Active)?;
        self.send(ServerLine::NameAccepted)?;

        let sink = self.sink.clone().ok_or(SessionError::OutboxClosed)?;

        // Flagged before the await so a drop mid-registration still removes it
        self.sink_registered = true;
        self.registry.add_sink(sink).await?;

        info!(session_id = %self.id, name = %name, "Client joined");

        self.relay_lines(&name).await
    }

    /// Prompts until a name is claimed.
    ///
    /// Returns `None` if the client hangs up before claiming one. A taken
    /// name is not an error: the client is simply prompted again.
    async fn negotiate_name(&mut self) -> Result<Option<Name>, SessionError> {
        loop {
            self.send(ServerLine::SubmitName)?;

            let line = match self.read_line().await? {
                Some(line) => line,
                None => {
                    debug!(session_id = %self.id, "Client sent EOF before claiming a name");
                    return Ok(None);
                }
            };

            let candidate = Name::new(line);

            // Recorded before the claim so a drop mid-claim still releases it.
            // Release is owner-checked, so this never frees someone else's name.
            self.name = Some(candidate.clone());

            if self.registry.try_claim(candidate.clone(), self.id).await? {
                return Ok(Some(candidate));
            }

            self.name = None;
            debug!(
                session_id = %self.id,
                name = %candidate,
                "Name already claimed, prompting again"
            );
            self.enter(SessionState::AwaitName)?;
        }
    }

    /// Broadcasts every received line until end-of-stream.
    async fn relay_lines(&mut self, name: &Name) -> Result<(), SessionError> {
        while let Some(text) = self.read_line().await? {
            let report = self
                .registry
                .broadcast(Message::new(name.clone(), text))
                .await?;

            if !report.is_complete() {
                debug!(
                    session_id = %self.id,
                    delivered = report.delivered(),
                    failed = report.failed.len(),
                    "Broadcast partially delivered"
                );
            }
        }

        debug!(session_id = %self.id, "Client sent EOF");
        Ok(())
    }

    /// Reads one line; `None` at end-of-stream.
    ///
    /// The terminator (`\n` or `\r\n`) is stripped. Bytes that are not
    /// valid UTF-8 are replaced rather than failing the session.
    async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;

        if n == 0 {
            return Ok(None);
        }

        if buf.ends_with(b"\n") {
            buf.pop();
            if buf.ends_with(b"\r") {
                buf.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Queues a line for this client only.
    fn send(&self, line: ServerLine) -> Result<(), SessionError> {
        self.sink
            .as_ref()
            .ok_or(SessionError::OutboxClosed)?
            .deliver(Arc::from(line.to_string()))
            .map_err(|_| SessionError::OutboxClosed)
    }

    /// Moves to `next`, logging the transition.
    fn enter(&mut self, next: SessionState) -> Result<(), SessionError> {
        let from = self.state;
        self.state = from.transition(next)?;
        if from != next {
            debug!(session_id = %self.id, from = %from, to = %next, "Session state changed");
        }
        Ok(())
    }
}

impl<R> Session<R> {
    /// Removes the sink, releases the name, and closes the connection.
    ///
    /// Lines already queued for this client are still written: dropping the
    /// last sink lets the writer task drain the outbox before it shuts the
    /// connection down. Idempotent. Registry failures are logged, never
    /// returned.
    async fn teardown(&mut self) {
        if self.state.is_closed() {
            return;
        }

        if self.sink_registered {
            if let Err(e) = self.registry.remove_sink(self.id).await {
                warn!(session_id = %self.id, error = %e, "Failed to remove sink");
            }
            self.sink_registered = false;
        }

        if let Some(name) = self.name.take() {
            if let Err(e) = self.registry.release(name.clone(), self.id).await {
                warn!(session_id = %self.id, name = %name, error = %e, "Failed to release name");
            } else {
                info!(session_id = %self.id, name = %name, "Client left");
            }
        }

        self.sink = None;
        self.state = SessionState::Closed;
    }
}

impl<R> Drop for Session<R> {
    fn drop(&mut self) {
        if self.sink_registered {
            self.registry.remove_sink_detached(self.id);
        }
        if let Some(name) = self.name.take() {
            debug!(session_id = %self.id, name = %name, "Session dropped before teardown");
            self.registry.release_detached(name, self.id);
        }
        if !self.state.is_closed() {
            self.closed.cancel();
        }
    }
}

/// Drains a session's outbox into its connection.
///
/// Exits once every sink clone is gone and the outbox is drained, when a
/// write fails, or immediately if the session is dropped without teardown.
/// Exiting drops the outbox, so later deliveries to stale sink clones fail
/// instead of piling up.
async fn write_outbox<W>(id: SessionId, writer: W, mut outbox: Outbox, closed: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    loop {
        let line = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            line = outbox.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = closed.cancelled() => break,
            result = write_line(&mut writer, &line) => result,
        };

        if let Err(e) = result {
            debug!(session_id = %id, error = %e, "Failed to write to client");
            break;
        }
    }

    drop(outbox);

    // Every line is flushed as it is written, so skip the buffer here.
    let mut inner = writer.into_inner();
    if let Err(e) = inner.shutdown().await {
        debug!(session_id = %id, error = %e, "Failed to shut down connection");
    }
}

/// Writes one line plus newline and flushes.
async fn write_line<W>(writer: &mut BufWriter<W>, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The client closed its side of the connection.
    EndOfStream,

    /// An I/O or registry fault ended the session.
    Fault(SessionError),
}

impl CloseReason {
    /// Returns true if the session ended because of a fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of stream"),
            Self::Fault(e) => write!(f, "fault: {e}"),
        }
    }
}

/// Errors that can occur during a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Outbox closed")]
    OutboxClosed,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] DomainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{spawn_registry, RegistryCommand};
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};
    use tokio::io::{duplex, split, AsyncReadExt, DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    /// Client end of an in-memory connection.
    struct TestClient {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl TestClient {
        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            timeout(RECV_TIMEOUT, self.lines.next_line())
                .await
                .expect("timed out waiting for server line")
                .unwrap()
        }
    }

    fn connect(
        id: u64,
        registry: &RegistryHandle,
    ) -> (Session<ReadHalf<DuplexStream>>, TestClient) {
        let (server_end, client_end) = duplex(4096);
        let (server_read, server_write) = split(server_end);
        let (client_read, client_write) = split(client_end);

        let session = Session::new(
            SessionId::new(id),
            server_read,
            server_write,
            registry.clone(),
        );
        let client = TestClient {
            lines: BufReader::new(client_read).lines(),
            writer: client_write,
        };
        (session, client)
    }

    #[tokio::test]
    async fn test_eof_before_name_closes_cleanly() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.id(), SessionId::new(1));

        let task = tokio::spawn(session.run());
        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));

        client.writer.shutdown().await.unwrap();

        let reason = task.await.unwrap();
        assert!(matches!(reason, CloseReason::EndOfStream));
        assert!(registry.snapshot_names().await.is_empty());
        assert_eq!(client.recv().await, None, "connection should be closed");
    }

    #[tokio::test]
    async fn test_claim_then_echo_own_message() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("alice").await;
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));

        client.send("hello").await;
        assert_eq!(client.recv().await.as_deref(), Some("MESSAGE alice: hello"));

        assert_eq!(registry.snapshot_names().await, vec![Name::from("alice")]);
        assert_eq!(registry.sink_count().await, 1);

        client.writer.shutdown().await.unwrap();
        assert!(matches!(task.await.unwrap(), CloseReason::EndOfStream));

        assert!(registry.snapshot_names().await.is_empty());
        assert_eq!(registry.sink_count().await, 0);
    }

    #[tokio::test]
    async fn test_taken_name_reprompts() {
        let registry = spawn_registry();
        assert!(registry
            .try_claim(Name::from("alice"), SessionId::new(99))
            .await
            .unwrap());

        let (session, mut client) = connect(1, &registry);
        let _task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("alice").await;
        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("bob").await;
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));
    }

    #[tokio::test]
    async fn test_protocol_tokens_are_plain_text_when_active() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let _task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("carol").await;
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));

        client.send("SUBMITNAME").await;
        assert_eq!(
            client.recv().await.as_deref(),
            Some("MESSAGE carol: SUBMITNAME")
        );
    }

    #[tokio::test]
    async fn test_crlf_line_endings_are_stripped() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let _task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.writer.write_all(b"dave\r\n").await.unwrap();
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));
        assert_eq!(registry.snapshot_names().await, vec![Name::from("dave")]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_not_fatal() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let _task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("erin").await;
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));

        client.writer.write_all(b"caf\xe9\n").await.unwrap();
        assert_eq!(
            client.recv().await.as_deref(),
            Some("MESSAGE erin: caf\u{fffd}")
        );

        // Still connected and relaying
        client.send("ok").await;
        assert_eq!(client.recv().await.as_deref(), Some("MESSAGE erin: ok"));
        assert_eq!(registry.snapshot_names().await, vec![Name::from("erin")]);
    }

    #[tokio::test]
    async fn test_half_close_flushes_queued_lines() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let task = tokio::spawn(session.run());

        // Pipeline everything, then close our side without reading
        client.writer.write_all(b"gina\nhi\n").await.unwrap();
        client.writer.shutdown().await.unwrap();

        assert!(matches!(task.await.unwrap(), CloseReason::EndOfStream));

        let mut rest = String::new();
        timeout(RECV_TIMEOUT, client.lines.get_mut().read_to_string(&mut rest))
            .await
            .expect("timed out waiting for connection close")
            .unwrap();
        assert_eq!(rest, "SUBMITNAME\nNAMEACCEPTED\nMESSAGE gina: hi\n");
        assert!(registry.snapshot_names().await.is_empty());
        assert_eq!(registry.sink_count().await, 0);
    }

    #[tokio::test]
    async fn test_final_line_without_newline_is_relayed() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("hank").await;
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));

        client.writer.write_all(b"bye").await.unwrap();
        client.writer.shutdown().await.unwrap();

        assert_eq!(client.recv().await.as_deref(), Some("MESSAGE hank: bye"));
        assert_eq!(client.recv().await, None);
        assert!(matches!(task.await.unwrap(), CloseReason::EndOfStream));
    }

    #[tokio::test]
    async fn test_dropped_session_cleans_up() {
        let registry = spawn_registry();
        let (session, mut client) = connect(1, &registry);
        let task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("frank").await;
        assert_eq!(client.recv().await.as_deref(), Some("NAMEACCEPTED"));

        // Aborting drops the session mid-read, skipping the normal teardown
        task.abort();
        let _ = task.await;

        timeout(RECV_TIMEOUT, async {
            while !registry.snapshot_names().await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("name should be released after drop");
        assert_eq!(registry.sink_count().await, 0);
    }

    #[tokio::test]
    async fn test_drop_during_sink_registration_removes_sink() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let (event_tx, _) = broadcast::channel(16);
        let registry = RegistryHandle::new(cmd_tx, event_tx);

        let (session, mut client) = connect(1, &registry);
        let task = tokio::spawn(session.run());

        assert_eq!(client.recv().await.as_deref(), Some("SUBMITNAME"));
        client.send("ivy").await;

        match cmd_rx.recv().await {
            Some(RegistryCommand::TryClaim { respond_to, .. }) => {
                let _ = respond_to.send(true);
            }
            _ => panic!("expected a claim"),
        }

        // Leave the registration unanswered and drop the session mid-await
        let pending = match cmd_rx.recv().await {
            Some(RegistryCommand::AddSink { respond_to, .. }) => respond_to,
            _ => panic!("expected a sink registration"),
        };
        task.abort();
        let _ = task.await;
        drop(pending);

        let mut removed = false;
        let mut released = false;
        while !(removed && released) {
            let cmd = timeout(RECV_TIMEOUT, cmd_rx.recv())
                .await
                .expect("cleanup commands should follow the drop")
                .unwrap();
            match cmd {
                RegistryCommand::RemoveSink { session_id, .. } => {
                    assert_eq!(session_id, SessionId::new(1));
                    removed = true;
                }
                RegistryCommand::Release { name, owner, .. } => {
                    assert_eq!(name, Name::from("ivy"));
                    assert_eq!(owner, SessionId::new(1));
                    released = true;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::EndOfStream.to_string(), "end of stream");
        let fault = CloseReason::Fault(SessionError::Io("reset".to_string()));
        assert_eq!(fault.to_string(), "fault: I/O error: reset");
        assert!(fault.is_fault());
    }

    #[test]
    fn test_session_error_from_registry() {
        let err: SessionError = RegistryError::ChannelClosed.into();
        assert_eq!(err.to_string(), "Registry error: response channel closed");
    }
}
