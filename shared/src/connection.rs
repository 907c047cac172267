//! Connection-oriented transport over TCP
//!
//! A [`Transport`] owns every connection of one endpoint. Socket I/O runs in
//! small per-connection tasks that only move bytes: a reader forwards what it
//! reads, a writer drains an outbound queue. All connection state, including
//! the inbound and outbound buffers, lives with the transport owner and is
//! touched only from [`Transport::poll`] and the callback it drives, so the
//! caller never needs a lock.

use crate::error::ProtocolError;
use crate::hex_dump;
use crate::protocol::Frame;
use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK_SIZE: usize = 4096;

/// Bytes handed to a writer task but not yet written before the peer is
/// considered stalled and dropped
pub const MAX_OUTBOUND_BACKLOG: usize = 4 * 1024 * 1024;

/// Stable identity of a connection for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle notifications delivered by [`Transport::poll`]
///
/// `Open` fires once per connection before anything else, `Recv` whenever
/// bytes were appended to the inbound buffer, and `Close` exactly once as
/// the final event. The connection is gone after `Close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Open,
    Recv,
    Close,
}

/// Socket activity forwarded from I/O tasks to the transport owner
#[derive(Debug)]
enum SocketEvent {
    Established {
        stream: TcpStream,
        peer: SocketAddr,
    },
    Data {
        id: ConnectionId,
        bytes: Bytes,
    },
    Closed {
        id: ConnectionId,
        error: Option<io::Error>,
    },
}

/// One byte-stream peer with its inbound and outbound buffers
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    /// Bytes received but not yet consumed by a decoder
    pub recv_buffer: BytesMut,
    send_buffer: BytesMut,
    outbound: mpsc::UnboundedSender<Bytes>,
    /// Shared with the writer task, which subtracts what it has written
    backlog: Arc<AtomicUsize>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: bool,
}

impl Connection {
    fn new(
        id: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Bytes>,
        backlog: Arc<AtomicUsize>,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            peer,
            recv_buffer: BytesMut::new(),
            send_buffer: BytesMut::new(),
            outbound,
            backlog,
            reader,
            writer,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Appends raw bytes to the outbound buffer. Never blocks.
    pub fn send(&mut self, bytes: &[u8]) {
        if !self.closed {
            self.send_buffer.extend_from_slice(bytes);
        }
    }

    /// Encodes a frame straight into the outbound buffer
    pub fn send_frame<F: Frame>(&mut self, frame: &F) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        frame.encode(&mut self.send_buffer)
    }

    /// Extracts the next complete frame from the inbound buffer, if any
    pub fn receive<F: Frame>(&mut self) -> Result<Option<F>, ProtocolError> {
        F::decode(&mut self.recv_buffer)
    }

    pub fn pending_send(&self) -> usize {
        self.send_buffer.len()
    }

    /// Hands everything buffered so far to the writer task
    ///
    /// A peer that stops reading is dropped once the writer's backlog would
    /// pass [`MAX_OUTBOUND_BACKLOG`]; the unsent bytes are discarded.
    pub fn flush(&mut self) {
        if self.closed || self.send_buffer.is_empty() {
            return;
        }
        let queued = self.backlog.load(Ordering::Acquire);
        if queued + self.send_buffer.len() > MAX_OUTBOUND_BACKLOG {
            warn!(
                "Connection {} ({}) stopped reading with {} bytes queued, dropping it",
                self.id, self.peer, queued
            );
            self.send_buffer.clear();
            self.writer.abort();
            self.closed = true;
            return;
        }
        let bytes = self.send_buffer.split().freeze();
        self.backlog.fetch_add(bytes.len(), Ordering::AcqRel);
        if self.outbound.send(bytes).is_err() {
            debug!("Writer for connection {} is gone", self.id);
            self.closed = true;
        }
    }

    /// Flushes pending output and marks the connection for teardown.
    ///
    /// The owning transport delivers `Close` for it on the current or next
    /// poll.
    pub fn close(&mut self) {
        self.flush();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("recv_buffer", &self.recv_buffer.len())
            .field("send_buffer", &self.send_buffer.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Owner of all connections of one endpoint, server or client
pub struct Transport {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u32,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events_rx: mpsc::UnboundedReceiver<SocketEvent>,
    listener: Option<JoinHandle<()>>,
}

impl Transport {
    fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
            listener: None,
        }
    }

    /// Binds a listening socket and starts accepting connections
    ///
    /// Returns the transport and the bound address, which differs from the
    /// requested one when port 0 was used.
    pub async fn listen<A: ToSocketAddrs>(addr: A) -> io::Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let mut transport = Self::new();
        let events = transport.events_tx.clone();
        transport.listener = Some(tokio::spawn(accept_loop(listener, events)));
        Ok((transport, local_addr))
    }

    /// Opens a single outbound connection; its `Open` fires on the first poll
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;

        let transport = Self::new();
        // The receiver lives in the same struct, so this cannot fail
        let _ = transport
            .events_tx
            .send(SocketEvent::Established { stream, peer });
        Ok(transport)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Live connections in ascending identity order
    pub fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut().filter(|c| !c.closed)
    }

    pub fn flush_all(&mut self) {
        for connection in self.connections.values_mut() {
            connection.flush();
        }
    }

    /// Waits up to `timeout` for socket activity and dispatches it
    ///
    /// Once the first event arrives, every event already queued is handled
    /// as well without further waiting. A zero timeout only drains what is
    /// ready. An `Err` from the callback closes that connection. All
    /// outbound buffers are flushed before returning.
    pub async fn poll<F, E>(&mut self, timeout: Duration, mut on_event: F)
    where
        F: FnMut(&mut Connection, Event) -> Result<(), E>,
        E: fmt::Display,
    {
        self.reap_closed(&mut on_event);

        if let Ok(Some(event)) = tokio::time::timeout(timeout, self.events_rx.recv()).await {
            self.dispatch(event, &mut on_event);
            while let Ok(event) = self.events_rx.try_recv() {
                self.dispatch(event, &mut on_event);
            }
        }

        self.reap_closed(&mut on_event);
        self.flush_all();
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) -> ConnectionId {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", peer, e);
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let writer = tokio::spawn(write_loop(id, write_half, outbound_rx, backlog.clone()));
        let reader = tokio::spawn(read_loop(id, read_half, self.events_tx.clone()));

        self.connections.insert(
            id,
            Connection::new(id, peer, outbound_tx, backlog, reader, writer),
        );
        id
    }

    fn dispatch<F, E>(&mut self, event: SocketEvent, on_event: &mut F)
    where
        F: FnMut(&mut Connection, Event) -> Result<(), E>,
        E: fmt::Display,
    {
        match event {
            SocketEvent::Established { stream, peer } => {
                let id = self.register(stream, peer);
                debug!("Connection {} opened with {}", id, peer);
                self.notify(id, Event::Open, on_event);
            }
            SocketEvent::Data { id, bytes } => {
                let Some(connection) = self.connections.get_mut(&id) else {
                    return;
                };
                if connection.closed {
                    return;
                }
                connection.recv_buffer.extend_from_slice(&bytes);
                trace!(
                    "Connection {} receive buffer:\n{}",
                    id,
                    hex_dump(&connection.recv_buffer)
                );
                self.notify(id, Event::Recv, on_event);
            }
            SocketEvent::Closed { id, error } => {
                match error {
                    Some(e) => debug!("Connection {} failed: {}", id, e),
                    None => debug!("Connection {} closed by peer", id),
                }
                if let Some(connection) = self.connections.get_mut(&id) {
                    connection.closed = true;
                }
                self.reap(id, on_event);
            }
        }
    }

    fn notify<F, E>(&mut self, id: ConnectionId, event: Event, on_event: &mut F)
    where
        F: FnMut(&mut Connection, Event) -> Result<(), E>,
        E: fmt::Display,
    {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        if let Err(err) = on_event(connection, event) {
            warn!("Closing connection {} ({}): {}", id, connection.peer, err);
            connection.close();
        }
        if connection.closed {
            self.reap(id, on_event);
        }
    }

    /// Removes a connection and delivers its single `Close`
    fn reap<F, E>(&mut self, id: ConnectionId, on_event: &mut F)
    where
        F: FnMut(&mut Connection, Event) -> Result<(), E>,
        E: fmt::Display,
    {
        if let Some(mut connection) = self.connections.remove(&id) {
            connection.close();
            if let Err(err) = on_event(&mut connection, Event::Close) {
                warn!("Error while closing connection {}: {}", id, err);
            }
        }
    }

    fn reap_closed<F, E>(&mut self, on_event: &mut F)
    where
        F: FnMut(&mut Connection, Event) -> Result<(), E>,
        E: fmt::Display,
    {
        let closed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.closed)
            .map(|c| c.id)
            .collect();
        for id in closed {
            self.reap(id, on_event);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<SocketEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if events
                    .send(SocketEvent::Established { stream, peer })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn read_loop<R>(id: ConnectionId, mut reader: R, events: mpsc::UnboundedSender<SocketEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                let _ = events.send(SocketEvent::Closed { id, error: None });
                break;
            }
            Ok(len) => {
                let bytes = Bytes::copy_from_slice(&buffer[..len]);
                if events.send(SocketEvent::Data { id, bytes }).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(SocketEvent::Closed { id, error: Some(e) });
                break;
            }
        }
    }
}

async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    backlog: Arc<AtomicUsize>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("Write to connection {} failed: {}", id, e);
            return;
        }
        backlog.fetch_sub(bytes.len(), Ordering::AcqRel);
    }
    let _ = writer.shutdown().await;
}
