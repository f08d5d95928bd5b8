//! # Pocket Edition Server Library
//!
//! This library hosts the server side of the pocket edition protocol: it owns
//! the UDP socket, keeps one session per peer, applies decoded requests to the
//! world on a fixed tick and sends the resulting packets back with each
//! peer's own protocol version.
//!
//! ## Core Responsibilities
//!
//! ### Version Negotiation
//! A peer without a session is only listened to when it sends a login frame.
//! The [`protocol::SubprotocolManager`] picks the codec serving the declared
//! protocol version. Peers on versions the server cannot serve get an
//! explicit "outdated client" or "outdated server" status and no session.
//!
//! ### Tick-Driven Simulation
//! Requests are decoded as they arrive but only applied on the tick. Every
//! change to the world produces responses addressed to a set of peers; those
//! are encoded per codec, compressed where worthwhile, and flushed once per
//! tick in the order they were produced.
//!
//! ### Failure Containment
//! A malformed packet costs only that packet. Failures that leave the stream
//! in an unknown state (bad batch envelopes) end the session, and the
//! player's departure is broadcast like a normal disconnect.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! - Session tracking by address and the negotiated codec
//! - Session limit and timeout detection
//!
//! ### Game Module (`game`)
//! - Player snapshots, login admission, chat and movement
//! - Responses addressed to recipient sets
//!
//! ### Network Module (`network`)
//! - Receiver, sender and timeout tasks around the tick loop
//! - Per-codec encoding of responses
//!
//! ### Supporting Modules
//! - `config`: TOML configuration with defaults
//! - `outgoing`: per-tick packet aggregation and compression barrier
//! - `workers`: bounded pool for compression work
//! - `world`: chunk source for login
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::world::FlatChunkProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let chunks = Arc::new(FlatChunkProvider::new()?);
//!
//!     // Binds 0.0.0.0:19132 and serves protocols 27 and 34 at 20 ticks per second
//!     let mut server = Server::new(&config, chunks).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server runs these tasks:
//! - **Network Receiver**: reads datagrams, negotiates and decodes
//! - **Network Sender**: writes flushed packets to the socket
//! - **Timeout Checker**: drops silent sessions
//! - **Main Loop**: applies requests on each tick and flushes the results

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod outgoing;
pub mod workers;
pub mod world;
