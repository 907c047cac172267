//! Authoritative roster of connected players
//!
//! This module tracks one [`PlayerRecord`] per open connection:
//! - Record creation at connect time with a freshly generated display name
//! - Application of decoded client updates to the sender's own record
//! - Record removal when the connection closes
//! - Latching the first reported winner for the status line
//!
//! Names come from a counter owned by the store, so they are unique among
//! connected players and never handed out twice in one server run.

use log::info;
use shared::{ButtonCounts, ClientUpdate, ConnectionId, Controls, Position};
use std::collections::BTreeMap;

/// Server-side state of one connected player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Connection this record belongs to
    pub connection: ConnectionId,
    /// Generated display name, assigned once at connect time
    pub name: String,
    /// Last position reported by the player
    pub position: Position,
    /// Press counters from the most recent buttons update
    pub buttons: ButtonCounts,
    /// Accumulated presses, or the collected count for progress updates
    pub score: u32,
    /// Whether the player has reported reaching the goal
    pub won: bool,
}

impl PlayerRecord {
    /// Creates a record at the origin with no progress
    pub fn new(connection: ConnectionId, name: String) -> Self {
        Self {
            connection,
            name,
            position: Position::ZERO,
            buttons: ButtonCounts::default(),
            score: 0,
            won: false,
        }
    }

    /// Folds one client update into the record
    ///
    /// Buttons updates add their presses to the running score. Progress
    /// updates carry the authoritative collected count, so they replace it.
    pub fn apply(&mut self, update: &ClientUpdate) {
        self.position = update.position;
        match update.controls {
            Controls::Buttons(counts) => {
                self.buttons = counts;
                self.score = self.score.saturating_add(counts.total());
            }
            Controls::Progress { collected, won } => {
                self.score = u32::from(collected);
                self.won |= won;
            }
        }
    }
}

/// Maps connection identity to player record
///
/// Iteration is in ascending connection identity, which is join order. That
/// order is stable across a tick, so status text and roster snapshots built
/// in the same tick agree with each other.
#[derive(Debug)]
pub struct RosterStore {
    players: BTreeMap<ConnectionId, PlayerRecord>,
    /// Number used for the next generated name
    next_player_number: u32,
    /// Maximum number of simultaneous players
    max_players: usize,
    /// Name of the first player to report a win
    winner: Option<String>,
}

impl RosterStore {
    /// Creates an empty roster. Generated names start at `Player1`.
    pub fn new(max_players: usize) -> Self {
        Self {
            players: BTreeMap::new(),
            next_player_number: 1,
            max_players,
            winner: None,
        }
    }

    /// Creates the record for a newly opened connection
    ///
    /// Returns `None` when the roster is full or the identity already has a
    /// record. A refused connection does not consume a name.
    pub fn connect(&mut self, connection: ConnectionId) -> Option<&PlayerRecord> {
        if self.players.len() >= self.max_players || self.players.contains_key(&connection) {
            return None;
        }

        let name = format!("Player{}", self.next_player_number);
        self.next_player_number += 1;

        info!("{} joined as {}", connection, name);
        let record = self
            .players
            .entry(connection)
            .or_insert_with(|| PlayerRecord::new(connection, name));
        Some(record)
    }

    /// Removes the record of a closed connection
    pub fn disconnect(&mut self, connection: ConnectionId) -> Option<PlayerRecord> {
        let record = self.players.remove(&connection)?;
        info!("{} ({}) left", record.name, connection);
        Some(record)
    }

    /// Applies a decoded update to the sender's own record
    ///
    /// Returns false if the connection has no record. The first update that
    /// reports a win latches that player as the winner for the rest of the
    /// run.
    pub fn upsert(&mut self, connection: ConnectionId, update: &ClientUpdate) -> bool {
        let Some(record) = self.players.get_mut(&connection) else {
            return false;
        };
        record.apply(update);

        if record.won && self.winner.is_none() {
            info!("{} wins", record.name);
            self.winner = Some(record.name.clone());
        }
        true
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&PlayerRecord> {
        self.players.get(&connection)
    }

    /// Records in join order
    pub fn iter(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values()
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
