//! Relay Daemon - Name registry and broadcast server
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `registry` - Registry actor owning claimed names and broadcast sinks
//! - `server` - TCP listener and per-client sessions
//! - `observer` - Hooks for watching room activity
//! - `config` - Listen address configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        relayd                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   RelayServer   │     │       RegistryActor         │   │
//! │  │  (TcpListener)  │     │  (names + sinks owner)      │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                      ▲      │                   │
//! │           │ connections          │      │ events            │
//! │           ▼                      │      ▼                   │
//! │  ┌─────────────────┐  commands   │  ┌─────────────────────┐ │
//! │  │     Session     │─────────────┘  │  RelayObserver      │ │
//! │  │  (per client)   │                │  (optional)         │ │
//! │  └─────────────────┘                └─────────────────────┘ │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod observer;
pub mod registry;
pub mod server;
