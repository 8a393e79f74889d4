//! The networked server.

use crate::config::ServerConfig;
use crate::connection::{ConnectionId, FrameReader};
use crate::error::{ServerError, ServerResult};
use crate::store::{Delivery, ServerStore};
use bytes::{Bytes, BytesMut};
use ntables_core::{
    ConnectionState, ConnectionStateMachine, Entry, EntryFlags, EntryValue, EventBus,
    Participant, ParticipantEvent,
};
use ntables_protocol::{Message, RpcDefinition};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 4096;

struct Peer {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

/// Everything mutated by the event loop, behind one lock.
struct ServerState {
    store: ServerStore,
    connection: ConnectionStateMachine,
    peers: HashMap<ConnectionId, Peer>,
    next_conn: u64,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
}

impl ServerState {
    /// Encodes and queues deliveries. Called with the lock held so every
    /// connection sees messages in processing order.
    fn route(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let bytes = match delivery.message.encode() {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(message = delivery.message.name(), error = %err, "failed to encode message");
                    continue;
                }
            };
            for conn in self.store.recipients(delivery.target) {
                if let Some(peer) = self.peers.get(&conn) {
                    if peer.outbound.send(bytes.clone()).is_err() {
                        debug!(%conn, "connection closing, message dropped");
                    }
                }
            }
        }
    }
}

struct ServerInner {
    config: ServerConfig,
    state: Mutex<ServerState>,
    events: EventBus,
}

/// A NetworkTables server.
///
/// Holds the authoritative entry table, assigns ids and relays changes
/// between clients. Entries survive `stop`/`start`.
///
/// # Example
///
/// ```no_run
/// use ntables_core::Participant;
/// use ntables_server::{Server, ServerConfig};
///
/// # async fn demo() -> ntables_server::ServerResult<()> {
/// let server = Server::new(ServerConfig::default().with_identity("field"));
/// server.start().await?;
/// server.set_string("/match/phase", "auto");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Creates a server. Nothing is bound until [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let state = ServerState {
            store: ServerStore::new(config.identity.clone(), events.clone()),
            connection: ConnectionStateMachine::new(events.clone()),
            peers: HashMap::new(),
            next_conn: 1,
            local_addr: None,
            acceptor: None,
        };
        Self {
            inner: Arc::new(ServerInner {
                config,
                state: Mutex::new(state),
                events,
            }),
        }
    }

    /// Binds the listener and starts accepting clients.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started twice, `Io` if the address cannot be
    /// bound.
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        {
            let mut state = self.inner.state.lock();
            if state.connection.state() != ConnectionState::NotConnected {
                return Err(ServerError::AlreadyRunning);
            }
            state.connection.transition(ConnectionState::Connecting);
        }

        let bound = match TcpListener::bind(self.inner.config.bind_addr).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(err) => Err(err),
        };
        let mut state = self.inner.state.lock();
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                warn!(addr = %self.inner.config.bind_addr, error = %err, "bind failed");
                state.connection.transition(ConnectionState::NotConnected);
                return Err(err.into());
            }
        };
        if state.connection.state() != ConnectionState::Connecting {
            // stop() ran while we were binding.
            return Err(ServerError::NotRunning);
        }

        let weak = Arc::downgrade(&self.inner);
        state.acceptor = Some(tokio::spawn(accept_loop(weak, listener)));
        state.local_addr = Some(local_addr);
        state.connection.transition(ConnectionState::Connected);
        info!(%local_addr, identity = %self.inner.config.identity, "server listening");
        Ok(local_addr)
    }

    /// Closes every connection and stops listening. Entries are kept.
    ///
    /// # Errors
    ///
    /// `NotRunning` if the server was not started.
    pub fn stop(&self) -> ServerResult<()> {
        let mut state = self.inner.state.lock();
        if state.connection.state() == ConnectionState::NotConnected {
            return Err(ServerError::NotRunning);
        }
        if let Some(acceptor) = state.acceptor.take() {
            acceptor.abort();
        }
        for (conn, peer) in state.peers.drain() {
            debug!(%conn, addr = %peer.addr, "closing connection");
            peer.task.abort();
        }
        state.store.clear_connections();
        state.local_addr = None;
        state.connection.transition(ConnectionState::NotConnected);
        info!("server stopped");
        Ok(())
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().local_addr
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().peers.len()
    }

    /// Parsed definition of the named RPC entry.
    pub fn rpc_definition(&self, name: &str) -> Option<RpcDefinition> {
        self.inner.state.lock().store.rpc_definition(name).cloned()
    }
}

impl ServerInner {
    fn on_accept(&self, weak: &Weak<ServerInner>, stream: TcpStream, addr: SocketAddr) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.connection.state().is_connected() {
            return;
        }
        if state.peers.len() >= self.config.max_connections {
            warn!(%addr, max = self.config.max_connections, "connection limit reached, rejecting");
            return;
        }

        let conn = ConnectionId(state.next_conn);
        state.next_conn += 1;
        let (outbound, queue) = mpsc::unbounded_channel();
        state.store.add_connection(conn);
        let task = tokio::spawn(serve(weak.clone(), conn, stream, queue));
        state.peers.insert(
            conn,
            Peer {
                addr,
                outbound,
                task,
            },
        );
        info!(%conn, %addr, "client connected");
    }

    fn on_message(&self, conn: ConnectionId, message: Message) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        debug!(%conn, message = message.name(), "received");
        let deliveries = state.store.handle_message(conn, message);
        state.route(deliveries);
    }

    fn on_closed(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        state.store.remove_connection(conn);
        if let Some(peer) = state.peers.remove(&conn) {
            info!(%conn, addr = %peer.addr, "client disconnected");
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(acceptor) = state.acceptor.take() {
            acceptor.abort();
        }
        for (_, peer) in state.peers.drain() {
            peer.task.abort();
        }
    }
}

async fn accept_loop(server: Weak<ServerInner>, listener: TcpListener) {
    loop {
        let accepted = listener.accept().await;
        let Some(inner) = server.upgrade() else {
            break;
        };
        match accepted {
            Ok((stream, addr)) => inner.on_accept(&server, stream, addr),
            Err(err) => warn!(error = %err, "failed to accept connection"),
        }
    }
}

/// Runs one connection until either direction ends.
async fn serve(
    server: Weak<ServerInner>,
    conn: ConnectionId,
    stream: TcpStream,
    queue: mpsc::UnboundedReceiver<Bytes>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%conn, error = %err, "failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    let result = tokio::select! {
        result = read_loop(&server, conn, reader) => result,
        result = write_loop(writer, queue) => result.map_err(ServerError::from),
    };
    if let Err(err) = result {
        warn!(%conn, error = %err, "connection closed with error");
    }
    if let Some(inner) = server.upgrade() {
        inner.on_closed(conn);
    }
}

async fn read_loop(
    server: &Weak<ServerInner>,
    conn: ConnectionId,
    mut reader: OwnedReadHalf,
) -> ServerResult<()> {
    let mut frames = FrameReader::new();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.clear();
        buf.reserve(READ_BUFFER_SIZE);
        if reader.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
        let decoded = frames.push(&buf);
        let Some(inner) = server.upgrade() else {
            return Ok(());
        };
        for message in decoded.messages {
            inner.on_message(conn, message);
        }
        if let Some(err) = decoded.error {
            return Err(err.into());
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) -> std::io::Result<()> {
    while let Some(bytes) = queue.recv().await {
        writer.write_all(&bytes).await?;
    }
    Ok(())
}

impl Participant for Server {
    fn identity(&self) -> String {
        self.inner.config.identity.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection.state()
    }

    fn subscribe(&self) -> broadcast::Receiver<ParticipantEvent> {
        self.inner.events.subscribe()
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.inner.state.lock().store.get(name).cloned()
    }

    fn entries_with_prefix(&self, prefix: &str) -> Vec<Entry> {
        self.inner.state.lock().store.with_prefix(prefix)
    }

    fn set_entry_value(&self, name: &str, value: EntryValue) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        match state.store.set_local(name, value) {
            Ok(deliveries) => {
                state.route(deliveries);
                true
            }
            Err(err) => {
                debug!(error = %err, "write rejected");
                false
            }
        }
    }

    fn set_entry_flags(&self, name: &str, flags: EntryFlags) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        match state.store.set_flags_local(name, flags) {
            Ok(deliveries) => {
                state.route(deliveries);
                true
            }
            Err(_) => false,
        }
    }

    fn delete_entry(&self, name: &str) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        match state.store.delete_local(name) {
            Ok(deliveries) => {
                state.route(deliveries);
                true
            }
            Err(_) => false,
        }
    }

    fn clear_all(&self) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let deliveries = state.store.clear_all_local();
        state.route(deliveries);
    }
}
