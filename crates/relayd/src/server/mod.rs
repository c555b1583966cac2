//! TCP server for the relay daemon.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a Session for each client, without waiting on it
//! - Keeps accepting after a failed accept
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └────────┬────────┘
//!                                  │ broadcast
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │  every Session  │
//!                         │      sink       │
//!                         └─────────────────┘
//! ```
//!
//! No limit is placed on concurrent sessions.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod session;

pub use session::{CloseReason, Session, SessionError};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_core::SessionId;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::RegistryHandle;

/// TCP server for the relay.
///
/// Accepts connections and hands each one to its own `Session` task.
pub struct RelayServer {
    /// Bound listener
    listener: TcpListener,

    /// Address the listener is bound to
    local_addr: SocketAddr,

    /// Handle to the shared registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating session IDs
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Binds the listening socket.
    ///
    /// Binding is the only fatal step: if it fails, the relay cannot start.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on (port 0 picks a free port)
    /// * `registry` - Handle to the shared registry
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        addr: SocketAddr,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            local_addr,
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the registry handle shared with sessions.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Runs the accept loop.
    ///
    /// Listens for connections until the cancellation token is triggered.
    /// Sessions already running are left to finish on their own.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Relay server listening");

        loop {
            tokio::select! {
                // Check for cancellation
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                // Accept new connection
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            self.handle_connection(stream, peer);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        info!(
            connections = self.connection_counter.load(Ordering::Relaxed),
            "Server stopped accepting"
        );
        Ok(())
    }

    /// Handles a new client connection by spawning a session task.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let id = SessionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));
        let registry = self.registry.clone();

        debug!(session_id = %id, peer = %peer, "Accepted connection");

        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            let session = Session::new(id, reader, writer, registry);
            let reason = session.run().await;

            debug!(session_id = %id, peer = %peer, reason = %reason, "Session finished");
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:9001".parse().unwrap(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:9001"));
        assert!(err.to_string().contains("address in use"));
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let server = RelayServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            spawn_registry(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_ne!(server.local_addr().port(), 0);
        assert!(server.registry().is_connected());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let first = RelayServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            spawn_registry(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let result = RelayServer::bind(
            first.local_addr(),
            spawn_registry(),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_run_returns_after_cancel() {
        let cancel_token = CancellationToken::new();
        let server = RelayServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            spawn_registry(),
            cancel_token.clone(),
        )
        .await
        .unwrap();

        let task = tokio::spawn(server.run());
        cancel_token.cancel();

        assert!(task.await.unwrap().is_ok());
    }
}
