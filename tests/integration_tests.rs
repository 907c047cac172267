//! End-to-end tests running a real server and clients over loopback TCP
//!
//! Each test binds its own server on an ephemeral port and drives it from
//! the same runtime, so tests can run in parallel.

use assert_approx_eq::assert_approx_eq;
use client::game::SnapshotRetention;
use client::network::{Client, ClientError};
use server::network::{Server, ServerConfig};
use shared::{ButtonCounts, ClientUpdate, Position, ServerTick};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_test::assert_ok;

const TICK: Duration = Duration::from_millis(20);

async fn start_server(tick_interval: Duration) -> SocketAddr {
    let config = ServerConfig {
        tick_interval,
        ..Default::default()
    };
    let mut server = Server::bind("127.0.0.1:0", config)
        .await
        .expect("Failed to bind server");
    let addr = server.local_addr();
    tokio::spawn(async move { server.run().await });
    addr
}

async fn join(addr: SocketAddr) -> Client {
    Client::connect(addr, SnapshotRetention::PruneAbsent)
        .await
        .expect("Failed to connect client")
}

/// Polls until at least one tick arrives and returns the newest
async fn next_tick(client: &mut Client) -> ServerTick {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        let mut ticks = assert_ok!(client.poll(Duration::from_millis(50)).await);
        if let Some(tick) = ticks.pop() {
            return tick;
        }
    }
    panic!("No tick arrived within 3 seconds");
}

/// Polls ticks until one satisfies `accept`
async fn wait_for_tick<P>(client: &mut Client, mut accept: P) -> ServerTick
where
    P: FnMut(&ServerTick) -> bool,
{
    for _ in 0..150 {
        let tick = next_tick(client).await;
        if accept(&tick) {
            return tick;
        }
    }
    panic!("No matching tick arrived");
}

fn names(tick: &ServerTick) -> Vec<&str> {
    tick.roster.iter().map(|entry| entry.name.as_str()).collect()
}

/// PROTOCOL SCENARIOS
mod scenario_tests {
    use super::*;

    /// A lone client sees nobody else and only its own score
    #[tokio::test]
    async fn single_client_sees_empty_roster() {
        let addr = start_server(TICK).await;
        let mut client = join(addr).await;

        let tick = next_tick(&mut client).await;
        assert!(tick.roster.is_empty());
        assert_eq!(tick.status, "Player1: 0");
        assert!(client.game_state().is_empty());
    }

    /// A position sent by one client shows up in the other client's roster
    #[tokio::test]
    async fn position_reaches_other_client() {
        let addr = start_server(TICK).await;
        let mut first = join(addr).await;
        next_tick(&mut first).await;
        let mut second = join(addr).await;
        next_tick(&mut second).await;

        let counts = ButtonCounts {
            right: 1,
            ..Default::default()
        };
        let update = ClientUpdate::buttons(counts, Position::new(1.0, 2.0, 3.0));
        assert_ok!(first.send_update(&update));
        assert_ok!(first.poll(Duration::ZERO).await);

        let tick = wait_for_tick(&mut second, |tick| {
            tick.roster
                .first()
                .map_or(false, |entry| entry.position != Position::ZERO)
        })
        .await;

        assert_eq!(tick.roster.len(), 1);
        let entry = &tick.roster[0];
        assert_eq!(entry.name, "Player1");
        assert_approx_eq!(entry.position.x, 1.0);
        assert_approx_eq!(entry.position.y, 2.0);
        assert_approx_eq!(entry.position.z, 3.0);
        assert_eq!(tick.status, "Player1: 1 + Player2: 0");

        let snapshot = second.game_state().get("Player1").unwrap();
        assert_eq!(snapshot.position, Position::new(1.0, 2.0, 3.0));
    }

    /// An unknown tag byte gets the sender disconnected and forgotten
    #[tokio::test]
    async fn malformed_frame_closes_connection() {
        let addr = start_server(TICK).await;
        let mut observer = join(addr).await;
        next_tick(&mut observer).await;

        let mut rogue = TcpStream::connect(addr).await.unwrap();
        wait_for_tick(&mut observer, |tick| names(tick) == ["Player2"]).await;

        rogue.write_all(b"x").await.unwrap();

        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(3), rogue.read_to_end(&mut rest)).await;
        assert!(read.is_ok(), "Server did not close the rogue connection");

        wait_for_tick(&mut observer, |tick| tick.roster.is_empty()).await;
        for _ in 0..3 {
            assert!(next_tick(&mut observer).await.roster.is_empty());
        }
        assert!(observer.is_connected());
    }

    /// A departed client disappears from the next broadcasts
    #[tokio::test]
    async fn disconnect_removes_player() {
        let addr = start_server(TICK).await;
        let mut leaving = join(addr).await;
        next_tick(&mut leaving).await;
        let mut staying = join(addr).await;
        wait_for_tick(&mut staying, |tick| names(tick) == ["Player1"]).await;

        drop(leaving);

        let mut seen = 0;
        loop {
            let tick = next_tick(&mut staying).await;
            seen += 1;
            if tick.roster.is_empty() {
                assert_eq!(tick.status, "Player2: 0");
                break;
            }
            assert!(seen < 10, "Departed player still listed after {} ticks", seen);
        }
        assert!(staying.game_state().get("Player1").is_none());
    }
}

/// ROSTER SEMANTICS
mod roster_tests {
    use super::*;

    /// Names keep counting up after players leave
    #[tokio::test]
    async fn names_are_not_reused() {
        let addr = start_server(TICK).await;
        let mut first = join(addr).await;
        next_tick(&mut first).await;
        drop(first);

        let mut second = join(addr).await;
        wait_for_tick(&mut second, |tick| tick.status == "Player2: 0").await;
        let mut third = join(addr).await;

        let tick = wait_for_tick(&mut third, |tick| !tick.roster.is_empty()).await;
        assert_eq!(names(&tick), ["Player2"]);
        assert_eq!(tick.status, "Player2: 0 + Player3: 0");
    }

    /// The first reported win replaces the score line for everyone
    #[tokio::test]
    async fn winner_is_announced() {
        let addr = start_server(TICK).await;
        let mut winner = join(addr).await;
        next_tick(&mut winner).await;
        let mut other = join(addr).await;
        next_tick(&mut other).await;

        assert_ok!(winner.send_update(&ClientUpdate::progress(5, true, Position::ZERO)));
        assert_ok!(winner.poll(Duration::ZERO).await);

        wait_for_tick(&mut other, |tick| tick.status == "Player1 wins!").await;
        assert_eq!(other.game_state().status(), "Player1 wins!");

        // later progress does not change the latched winner
        assert_ok!(other.send_update(&ClientUpdate::progress(9, true, Position::ZERO)));
        assert_ok!(other.poll(Duration::ZERO).await);
        wait_for_tick(&mut winner, |tick| tick.status == "Player1 wins!").await;
        for _ in 0..3 {
            assert_eq!(next_tick(&mut winner).await.status, "Player1 wins!");
        }
    }
}

/// TIMING AND LIFECYCLE
mod timing_tests {
    use super::*;

    /// Broadcasts are spaced by the configured interval
    #[tokio::test]
    async fn tick_cadence_matches_interval() {
        let interval = Duration::from_millis(30);
        let addr = start_server(interval).await;
        let mut client = join(addr).await;
        next_tick(&mut client).await;

        let start = Instant::now();
        let mut ticks = 0;
        while ticks < 10 {
            ticks += assert_ok!(client.poll(Duration::from_millis(5)).await).len();
        }
        let average = start.elapsed() / ticks as u32;

        assert!(
            average >= Duration::from_millis(20) && average <= Duration::from_millis(60),
            "Average tick spacing was {:?}",
            average
        );
    }

    /// The client reports the server going away instead of reconnecting
    #[tokio::test]
    async fn client_reports_lost_server() {
        let config = ServerConfig {
            tick_interval: TICK,
            ..Default::default()
        };
        let mut server = Server::bind("127.0.0.1:0", config).await.unwrap();
        let addr = server.local_addr();
        let handle = tokio::spawn(async move { server.run().await });

        let mut client = join(addr).await;
        next_tick(&mut client).await;

        handle.abort();
        let _ = handle.await;

        let mut outcome = Ok(Vec::new());
        for _ in 0..60 {
            outcome = client.poll(Duration::from_millis(50)).await;
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(ClientError::ConnectionLost)));
    }
}
