//! # Roster Server Library
//!
//! Authoritative server for the roster synchronization protocol. Clients
//! stream their input counters and position; the server keeps one record
//! per connection and, at a fixed tick rate, sends every client the
//! positions and names of all other players together with a shared status
//! line.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! One task owns the transport, the roster and the tick scheduler. Socket
//! reads and writes happen in small I/O tasks that only move bytes, so the
//! roster is never shared and needs no lock.
//!
//! ### Poll, Then Broadcast
//! Each tick polls connections until the deadline, applying decoded updates
//! as they arrive, then runs a single broadcast pass. Deadlines advance
//! additively so the cadence does not drift with processing time.
//!
//! ## Module Organization
//!
//! ### Roster Module (`roster`)
//! Player records keyed by connection, generated names and the winner latch.
//!
//! ### Tick Module (`tick`)
//! Deadline bookkeeping for the fixed-interval loop.
//!
//! ### Broadcast Module (`broadcast`)
//! Status line rendering and per-recipient roster snapshots.
//!
//! ### Network Module (`network`)
//! Server configuration and the loop tying the pieces to the transport.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind("0.0.0.0:8080", ServerConfig::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod network;
pub mod roster;
pub mod tick;
