//! # Roster Client Library
//!
//! Client side of the roster synchronization protocol. A client holds one
//! connection to the server, reports its local input counters and position,
//! and keeps the last known position of every other player named in the
//! server's ticks.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Snapshot store keyed by player name, with an explicit policy for players
//! that stop appearing in ticks.
//!
//! ### Input Module (`input`)
//! Per-direction press counters, progress reporting and a random-walk input
//! driver for headless runs.
//!
//! ### Network Module (`network`)
//! Connection handling, update sending, tick decoding and the frame loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::SnapshotRetention;
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:8080", SnapshotRetention::PruneAbsent).await?;
//!     client.run(&ClientConfig::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! Losing the server connection is reported as
//! [`ClientError::ConnectionLost`](network::ClientError::ConnectionLost);
//! the client never reconnects on its own.

pub mod game;
pub mod input;
pub mod network;
