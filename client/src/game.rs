//! Client-side view of the remote roster
//!
//! Snapshots are keyed by player name, which the server guarantees to be
//! unique for the session. Each applied tick replaces the status line and
//! updates or inserts the snapshot of every player it lists.

use shared::{Position, ServerTick};
use std::collections::BTreeMap;

/// What happens to snapshots of players missing from the latest tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotRetention {
    /// Forget players as soon as a tick no longer lists them
    #[default]
    PruneAbsent,
    /// Keep every player ever seen, with their last known position
    KeepAll,
}

/// Last known state of one remote player
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSnapshot {
    pub name: String,
    pub position: Position,
    /// Index of the last received tick that listed this player
    pub last_seen_tick: u64,
}

/// Roster differences produced by applying one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChanges {
    pub joined: Vec<String>,
    pub left: Vec<String>,
    pub status_changed: bool,
}

impl RosterChanges {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && !self.status_changed
    }
}

#[derive(Debug, Default)]
pub struct ClientGameState {
    retention: SnapshotRetention,
    status: String,
    snapshots: BTreeMap<String, ClientSnapshot>,
    ticks_received: u64,
}

impl ClientGameState {
    pub fn new(retention: SnapshotRetention) -> Self {
        Self {
            retention,
            ..Default::default()
        }
    }

    /// Folds a received tick into the local view
    ///
    /// Under [`SnapshotRetention::KeepAll`] players never leave, so
    /// `left` stays empty.
    pub fn apply_server_tick(&mut self, tick: ServerTick) -> RosterChanges {
        self.ticks_received += 1;
        let current = self.ticks_received;
        let mut changes = RosterChanges {
            status_changed: tick.status != self.status,
            ..Default::default()
        };
        self.status = tick.status;

        for entry in tick.roster {
            match self.snapshots.get_mut(&entry.name) {
                Some(snapshot) => {
                    snapshot.position = entry.position;
                    snapshot.last_seen_tick = current;
                }
                None => {
                    changes.joined.push(entry.name.clone());
                    self.snapshots.insert(
                        entry.name.clone(),
                        ClientSnapshot {
                            name: entry.name,
                            position: entry.position,
                            last_seen_tick: current,
                        },
                    );
                }
            }
        }

        if self.retention == SnapshotRetention::PruneAbsent {
            self.snapshots.retain(|name, snapshot| {
                let listed = snapshot.last_seen_tick == current;
                if !listed {
                    changes.left.push(name.clone());
                }
                listed
            });
        }

        changes
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn get(&self, name: &str) -> Option<&ClientSnapshot> {
        self.snapshots.get(name)
    }

    /// Snapshots ordered by name
    pub fn snapshots(&self) -> impl Iterator<Item = &ClientSnapshot> {
        self.snapshots.values()
    }

    pub fn retention(&self) -> SnapshotRetention {
        self.retention
    }

    pub fn ticks_received(&self) -> u64 {
        self.ticks_received
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
