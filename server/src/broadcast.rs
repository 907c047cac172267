//! Per-recipient tick messages
//!
//! A [`Broadcaster`] is built once per tick from the roster. The status line
//! is shared by every recipient, while each roster snapshot lists every
//! connected player except the recipient. Exclusion compares connection
//! identity, because names are only display text and positions may coincide.

use crate::roster::{PlayerRecord, RosterStore};
use shared::{ConnectionId, RosterEntry, ServerTick};

/// Separator between per-player scores in the status line
pub const STATUS_SEPARATOR: &str = " + ";

/// Renders the status line shared by all recipients in one tick
pub fn status_line(roster: &RosterStore) -> String {
    if let Some(winner) = roster.winner() {
        return format!("{} wins!", winner);
    }
    roster
        .iter()
        .map(|record| format!("{}: {}", record.name, record.score))
        .collect::<Vec<_>>()
        .join(STATUS_SEPARATOR)
}

pub struct Broadcaster<'a> {
    roster: &'a RosterStore,
    status: String,
}

impl<'a> Broadcaster<'a> {
    pub fn new(roster: &'a RosterStore) -> Self {
        Self {
            roster,
            status: status_line(roster),
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Tick message for one recipient, in roster iteration order
    pub fn build(&self, recipient: ConnectionId) -> ServerTick {
        let roster = self
            .roster
            .iter()
            .filter(|record| record.connection != recipient)
            .map(snapshot)
            .collect();

        ServerTick {
            status: self.status.clone(),
            roster,
        }
    }
}

fn snapshot(record: &PlayerRecord) -> RosterEntry {
    RosterEntry::new(record.name.clone(), record.position)
}
