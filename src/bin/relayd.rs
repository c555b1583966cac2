//! Relay Daemon - line-based broadcast chat server
//!
//! Clients connect over TCP, claim a unique display name, and every line
//! they send afterwards is relayed to everyone in the room.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:9001)
//! relayd
//!
//! # Listen on a specific interface and port
//! relayd --host 127.0.0.1 --port 4000
//!
//! # Same, from the environment
//! RELAY_HOST=127.0.0.1 RELAY_PORT=4000 relayd
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: stop accepting connections and exit

use std::net::IpAddr;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relayd::config::RelayConfig;
use relayd::observer::{spawn_observer, LogObserver, NoopObserver, RelayObserver};
use relayd::registry::spawn_registry;
use relayd::server::RelayServer;

/// Relay daemon - broadcast chat server
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Interface to listen on (overrides RELAY_HOST)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on (overrides RELAY_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Don't log joins, departures and chat lines
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .init();

    let mut config = RelayConfig::from_env().context("Invalid relay configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Relay daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Spawn the name registry
    let registry = spawn_registry();
    info!("Name registry started");

    // Room activity goes to the log unless asked not to
    let observer: Arc<dyn RelayObserver> = if args.quiet {
        Arc::new(NoopObserver)
    } else {
        Arc::new(LogObserver)
    };
    let _observer_handle = spawn_observer(&registry, observer, cancel_token.clone());

    // Bind is the only fatal startup step
    let server = RelayServer::bind(config.socket_addr(), registry, cancel_token)
        .await
        .context("Failed to start relay server")?;

    let addr = server.local_addr();
    info!(ip = %addr.ip(), port = addr.port(), "The chat server is running");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
