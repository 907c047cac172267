//! Server loop: poll connections until the tick deadline, then broadcast

use crate::broadcast::Broadcaster;
use crate::roster::RosterStore;
use crate::tick::TickScheduler;
use bytes::BytesMut;
use log::{debug, error, info, warn};
use shared::protocol::MAX_ROSTER_ENTRIES;
use shared::{
    ClientUpdate, Connection, ConnectionId, Event, Frame, ProtocolError, Transport,
    DEFAULT_MAX_PLAYERS, DEFAULT_TICK_RATE,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::ToSocketAddrs;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start listener: {0}")]
    Io(#[from] io::Error),
}

/// Runtime tunables for one server run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Time between broadcast passes
    pub tick_interval: Duration,
    /// Simultaneous players; further connections are closed on arrival
    pub max_players: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_tick_rate(DEFAULT_TICK_RATE)
    }
}

impl ServerConfig {
    /// Default capacity with `hz` ticks per second
    pub fn with_tick_rate(hz: u32) -> Self {
        Self {
            tick_interval: Duration::from_secs(1) / hz.max(1),
            max_players: DEFAULT_MAX_PLAYERS,
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tick_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "tick interval must be non-zero".to_string(),
            ));
        }
        // every recipient must fit all other players in one tick message
        if self.max_players == 0 || self.max_players > MAX_ROSTER_ENTRIES + 1 {
            return Err(ServerError::InvalidConfig(format!(
                "max players must be between 1 and {}, got {}",
                MAX_ROSTER_ENTRIES + 1,
                self.max_players
            )));
        }
        Ok(())
    }

    /// Ticks in roughly one second, used to pace periodic stats
    fn ticks_per_second(&self) -> u64 {
        (Duration::from_secs(1).as_nanos() / self.tick_interval.as_nanos()).max(1) as u64
    }
}

/// Authoritative roster server
pub struct Server {
    transport: Transport,
    local_addr: SocketAddr,
    roster: RosterStore,
    scheduler: TickScheduler,
    config: ServerConfig,
}

impl Server {
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let (transport, local_addr) = Transport::listen(addr).await?;
        info!(
            "Server listening on {} ({:?} ticks, up to {} players)",
            local_addr, config.tick_interval, config.max_players
        );

        Ok(Self {
            transport,
            local_addr,
            roster: RosterStore::new(config.max_players),
            scheduler: TickScheduler::new(config.tick_interval, Instant::now()),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ticks(&self) -> u64 {
        self.scheduler.ticks()
    }

    /// Runs ticks until the process is terminated
    pub async fn run(&mut self) {
        info!("Server started");
        loop {
            self.run_tick().await;
        }
    }

    /// Polls until the current deadline has passed, then broadcasts once
    pub async fn run_tick(&mut self) {
        let Self {
            transport,
            roster,
            scheduler,
            ..
        } = self;

        while let Some(remaining) = scheduler.remaining(Instant::now()) {
            transport
                .poll(remaining, |connection, event| {
                    handle_event(roster, connection, event)
                })
                .await;
        }
        scheduler.advance();

        self.broadcast();
        self.log_stats();
    }

    fn broadcast(&mut self) {
        let broadcaster = Broadcaster::new(&self.roster);
        for connection in self.transport.connections_mut() {
            let tick = broadcaster.build(connection.id());
            if let Err(e) = connection.send_frame(&tick) {
                error!("Failed to encode tick for {}: {}", connection.id(), e);
                connection.close();
            }
        }
        self.transport.flush_all();
    }

    fn log_stats(&self) {
        let ticks = self.scheduler.ticks();
        if ticks % self.config.ticks_per_second() != 0 {
            return;
        }
        let lag = self.scheduler.lag(Instant::now());
        debug!(
            "Tick {}: {} players, {} connections, lag {:?}",
            ticks,
            self.roster.len(),
            self.transport.len(),
            lag
        );
        if lag > self.scheduler.interval() {
            warn!("Server is {:?} behind its tick schedule", lag);
        }
    }
}

fn handle_event(
    roster: &mut RosterStore,
    connection: &mut Connection,
    event: Event,
) -> Result<(), ProtocolError> {
    match event {
        Event::Open => {
            if roster.connect(connection.id()).is_none() {
                warn!(
                    "Roster full, refusing {} from {}",
                    connection.id(),
                    connection.peer_addr()
                );
                connection.close();
            }
            Ok(())
        }
        Event::Recv => {
            let id = connection.id();
            ingest_updates(roster, id, &mut connection.recv_buffer).map(|_| ())
        }
        Event::Close => {
            roster.disconnect(connection.id());
            Ok(())
        }
    }
}

/// Applies every complete client update buffered for one connection
///
/// Updates decoded before a malformed frame are still applied. Returns the
/// number of updates applied; a trailing partial frame stays buffered.
pub fn ingest_updates(
    roster: &mut RosterStore,
    id: ConnectionId,
    buffer: &mut BytesMut,
) -> Result<usize, ProtocolError> {
    let mut applied = 0;
    while let Some(update) = ClientUpdate::decode(buffer)? {
        roster.upsert(id, &update);
        applied += 1;
    }
    Ok(applied)
}
