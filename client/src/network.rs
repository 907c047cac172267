//! Client connection to the roster server and the headless frame loop

use crate::game::{ClientGameState, RosterChanges, SnapshotRetention};
use crate::input::{InputManager, ProgressTracker, Wanderer};
use bytes::BytesMut;
use log::{debug, info};
use shared::{ClientUpdate, ConnectionId, Event, Frame, ProtocolError, ServerTick, Transport};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::ToSocketAddrs;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("lost connection to server")]
    ConnectionLost,

    #[error("server sent a malformed message: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to connect: {0}")]
    Io(#[from] io::Error),
}

/// What the frame loop reports to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Press counters, sent on frames where a key went down
    Buttons,
    /// Every key press collects one item until `goal` is reached
    Progress { goal: u8 },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub frame_interval: Duration,
    pub mode: UpdateMode,
    pub retention: SnapshotRetention,
    /// Seed for the random input driver; entropy when unset
    pub seed: Option<u64>,
    /// Stop after this many frames instead of running until disconnected
    pub max_frames: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs(1) / 60,
            mode: UpdateMode::Buttons,
            retention: SnapshotRetention::default(),
            seed: None,
            max_frames: None,
        }
    }
}

/// A single connection to the server plus the roster it reported
pub struct Client {
    transport: Transport,
    server: Option<ConnectionId>,
    state: ClientGameState,
    lost: bool,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        retention: SnapshotRetention,
    ) -> Result<Self, ClientError> {
        let transport = Transport::connect(addr).await?;
        let mut client = Self {
            transport,
            server: None,
            state: ClientGameState::new(retention),
            lost: false,
        };
        // registers the connection so updates can be queued right away
        client.poll(Duration::ZERO).await?;
        if client.server.is_none() {
            return Err(ClientError::ConnectionLost);
        }
        Ok(client)
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_some() && !self.lost
    }

    /// Queues an update; it is written out by the next poll
    pub fn send_update(&mut self, update: &ClientUpdate) -> Result<(), ClientError> {
        let connection = self
            .server
            .filter(|_| !self.lost)
            .and_then(|id| self.transport.get_mut(id))
            .ok_or(ClientError::ConnectionLost)?;
        connection.send_frame(update)?;
        Ok(())
    }

    /// Exchanges data with the server for up to `timeout`
    ///
    /// Returns the ticks received, already applied to the game state in
    /// arrival order. Losing the connection or receiving a malformed
    /// message ends the session.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Vec<ServerTick>, ClientError> {
        if self.lost {
            return Err(ClientError::ConnectionLost);
        }

        let mut ticks = Vec::new();
        let mut violation = None;
        let mut closed = false;
        let mut opened = None;

        self.transport
            .poll(timeout, |connection, event| match event {
                Event::Open => {
                    info!("Connected to {}", connection.peer_addr());
                    opened = Some(connection.id());
                    Ok(())
                }
                Event::Recv => {
                    let result = drain_ticks(&mut connection.recv_buffer, &mut ticks);
                    if let Err(e) = &result {
                        violation = Some(e.clone());
                    }
                    result
                }
                Event::Close => {
                    closed = true;
                    Ok(())
                }
            })
            .await;

        if opened.is_some() {
            self.server = opened;
        }
        for tick in &ticks {
            let changes = self.state.apply_server_tick(tick.clone());
            log_changes(&self.state, &changes);
        }

        if let Some(e) = violation {
            self.lost = true;
            return Err(ClientError::Protocol(e));
        }
        if closed {
            self.lost = true;
            return Err(ClientError::ConnectionLost);
        }
        Ok(ticks)
    }

    /// Runs the headless frame loop
    ///
    /// Each frame the random driver may press a key, the resulting update
    /// is queued, and whatever the server sent is applied. Returns `Ok`
    /// only when `max_frames` is reached.
    pub async fn run(&mut self, config: &ClientConfig) -> Result<(), ClientError> {
        let mut input = InputManager::default();
        let mut wanderer = Wanderer::new(config.seed);
        let mut progress = match config.mode {
            UpdateMode::Progress { goal } => Some(ProgressTracker::new(goal)),
            UpdateMode::Buttons => None,
        };

        let mut frames = interval(config.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut frame = 0u64;
        while config.max_frames.map_or(true, |max| frame < max) {
            frames.tick().await;
            frame += 1;

            let pressed = wanderer.step(&mut input).is_some();
            let update = match progress.as_mut() {
                Some(tracker) => {
                    if pressed {
                        tracker.collect(1);
                    }
                    // buttons counters are unused in this mode
                    input.take_update();
                    tracker.take_update(input.position())
                }
                None => input.take_update(),
            };
            if let Some(update) = update {
                self.send_update(&update)?;
            }

            self.poll(Duration::ZERO).await?;
        }
        Ok(())
    }
}

/// Extracts every complete tick, keeping those decoded before an error
fn drain_ticks(buffer: &mut BytesMut, ticks: &mut Vec<ServerTick>) -> Result<(), ProtocolError> {
    while let Some(tick) = ServerTick::decode(buffer)? {
        ticks.push(tick);
    }
    Ok(())
}

fn log_changes(state: &ClientGameState, changes: &RosterChanges) {
    for name in &changes.joined {
        info!("{} appeared", name);
    }
    for name in &changes.left {
        info!("{} is gone", name);
    }
    if changes.status_changed {
        info!("Status: {}", state.status());
    }
    debug!(
        "Tick {}: {} other players",
        state.ticks_received(),
        state.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Position, RosterEntry};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn encoded_tick(status: &str, names: &[&str]) -> BytesMut {
        let tick = ServerTick {
            status: status.to_string(),
            roster: names
                .iter()
                .map(|name| RosterEntry::new(*name, Position::ZERO))
                .collect(),
        };
        let mut buffer = BytesMut::new();
        tick.encode(&mut buffer).unwrap();
        buffer
    }

    async fn poll_until_tick(client: &mut Client) -> Result<Vec<ServerTick>, ClientError> {
        for _ in 0..50 {
            let ticks = client.poll(Duration::from_millis(50)).await?;
            if !ticks.is_empty() {
                return Ok(ticks);
            }
        }
        panic!("no tick arrived");
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.frame_interval, Duration::from_secs(1) / 60);
        assert_eq!(config.mode, UpdateMode::Buttons);
        assert_eq!(config.retention, SnapshotRetention::PruneAbsent);
        assert!(config.max_frames.is_none());
    }

    #[test]
    fn test_drain_ticks_keeps_partial_tail() {
        let mut buffer = encoded_tick("a", &["Player1"]);
        let second = encoded_tick("b", &[]);
        buffer.extend_from_slice(&second[..5]);

        let mut ticks = Vec::new();
        drain_ticks(&mut buffer, &mut ticks).unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].status, "a");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_drain_ticks_reports_unknown_tag() {
        let mut buffer = encoded_tick("a", &[]);
        buffer.extend_from_slice(b"b");

        let mut ticks = Vec::new();
        let result = drain_ticks(&mut buffer, &mut ticks);
        assert_eq!(result, Err(ProtocolError::UnknownTag(b'b')));
        assert_eq!(ticks.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Client::connect(addr, SnapshotRetention::default()).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_update_reaches_server_and_tick_is_applied() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = Client::connect(addr, SnapshotRetention::default())
            .await
            .unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();
        assert!(client.is_connected());

        let update = ClientUpdate::progress(1, false, Position::new(1.0, 2.0, 3.0));
        client.send_update(&update).unwrap();
        client.poll(Duration::ZERO).await.unwrap();

        let mut received = BytesMut::new();
        while received.len() < update.encoded_len() {
            server_side.read_buf(&mut received).await.unwrap();
        }
        assert_eq!(ClientUpdate::decode(&mut received).unwrap(), Some(update));

        server_side
            .write_all(&encoded_tick("Player1: 0 + Player2: 1", &["Player1"]))
            .await
            .unwrap();
        let ticks = poll_until_tick(&mut client).await.unwrap();

        assert_eq!(ticks.len(), 1);
        assert_eq!(client.game_state().status(), "Player1: 0 + Player2: 1");
        assert!(client.game_state().get("Player1").is_some());
    }

    #[tokio::test]
    async fn test_server_hangup_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = Client::connect(addr, SnapshotRetention::default())
            .await
            .unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        let mut outcome = Ok(Vec::new());
        for _ in 0..50 {
            outcome = client.poll(Duration::from_millis(50)).await;
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(ClientError::ConnectionLost)));
        assert!(!client.is_connected());
        assert!(matches!(
            client.send_update(&ClientUpdate::progress(0, false, Position::ZERO)),
            Err(ClientError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_malformed_tick_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = Client::connect(addr, SnapshotRetention::default())
            .await
            .unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();
        server_side.write_all(b"?").await.unwrap();

        let outcome = poll_until_tick(&mut client).await;
        assert!(matches!(
            outcome,
            Err(ClientError::Protocol(ProtocolError::UnknownTag(b'?')))
        ));
        assert!(matches!(
            client.poll(Duration::ZERO).await,
            Err(ClientError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_run_sends_progress_updates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = Client::connect(addr, SnapshotRetention::default())
            .await
            .unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        let config = ClientConfig {
            frame_interval: Duration::from_millis(1),
            mode: UpdateMode::Progress { goal: 3 },
            seed: Some(3),
            max_frames: Some(5),
            ..Default::default()
        };
        client.run(&config).await.unwrap();

        // first frame always presses a key, so one item is collected
        let mut received = BytesMut::new();
        let first = loop {
            if let Some(update) = ClientUpdate::decode(&mut received).unwrap() {
                break update;
            }
            server_side.read_buf(&mut received).await.unwrap();
        };
        assert!(matches!(
            first.controls,
            shared::Controls::Progress {
                collected: 1,
                won: false
            }
        ));
    }
}
