//! Pieces shared by the roster server and its clients: the binary frame
//! codec, the TCP transport that carries it, and the protocol error type.

pub mod connection;
pub mod error;
pub mod protocol;

pub use connection::{Connection, ConnectionId, Event, Transport};
pub use error::ProtocolError;
pub use protocol::{
    ButtonCounts, ClientUpdate, Controls, Frame, Message, Position, RosterEntry, ServerTick,
};

use std::fmt::Write;

pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_MAX_PLAYERS: usize = 256;

/// Renders bytes as offset, hex and printable columns, 16 bytes per line
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 16);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", row * 16);
        for column in 0..16 {
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, " {:02x}", byte);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        for &byte in chunk {
            out.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}
