//! The networked client.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::handshake::{ClientHandshake, ClientHandshakeState, HandshakeStep};
use crate::store::ClientStore;
use crate::transport::{ResilientSocket, TransportEvent};
use bytes::{Buf, BytesMut};
use ntables_core::{
    ConnectionState, ConnectionStateMachine, Endpoint, Entry, EntryFlags, EntryValue, EventBus,
    Participant, ParticipantEvent, ProtocolVersion,
};
use ntables_protocol::{next_message, Message};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Everything mutated by the event loop, behind one lock.
struct ClientState {
    handshake: ClientHandshake,
    store: ClientStore,
    connection: ConnectionStateMachine,
    frames: BytesMut,
    /// Set after a malformed frame; inbound data is dropped until the
    /// next session.
    resyncing: bool,
    rejected: Option<ProtocolVersion>,
}

struct ClientInner {
    config: ClientConfig,
    state: Mutex<ClientState>,
    socket: ResilientSocket,
    events: EventBus,
    transport_events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A NetworkTables client.
///
/// Entries can be written at any time; while offline they are kept as
/// pending and reconciled with the server on the next handshake.
///
/// # Example
///
/// ```no_run
/// use ntables_client::{Client, ClientConfig};
/// use ntables_core::{Endpoint, Participant};
///
/// # async fn demo() -> ntables_client::ClientResult<()> {
/// let client = Client::new(ClientConfig::new("dashboard", Endpoint::new("localhost", 1735)));
/// client.start();
/// client.wait_connected().await?;
/// client.set_double("/drive/speed", 0.5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client. Nothing happens on the network until [`start`](Self::start).
    pub fn new(config: ClientConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let (socket, transport_events) = ResilientSocket::new(config.transport());
        let state = ClientState {
            handshake: ClientHandshake::new(config.identity.clone()),
            store: ClientStore::new(events.clone()),
            connection: ConnectionStateMachine::new(events.clone()),
            frames: BytesMut::new(),
            resyncing: false,
            rejected: None,
        };
        Self {
            inner: Arc::new(ClientInner {
                config,
                state: Mutex::new(state),
                socket,
                events,
                transport_events: Mutex::new(Some(transport_events)),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts connecting, retrying until [`stop`](Self::stop).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.inner.state.lock().rejected = None;
        if let Some(receiver) = self.inner.transport_events.lock().take() {
            let weak = Arc::downgrade(&self.inner);
            let pump = tokio::spawn(pump(weak.clone(), receiver));
            let keep_alive = tokio::spawn(keep_alive(weak, self.inner.config.keep_alive_interval));
            self.inner.tasks.lock().extend([pump, keep_alive]);
        }
        info!(endpoint = %self.inner.socket.endpoint(), "client starting");
        self.inner.socket.connect();
    }

    /// Disconnects and stops reconnecting. Entries are kept.
    pub fn stop(&self) {
        self.inner.socket.disconnect();
        self.inner.on_closed();
    }

    /// Waits until the handshake completes.
    ///
    /// # Errors
    ///
    /// `ProtocolUnsupported` if the server rejects protocol 3.0,
    /// `Cancelled` if the client is dropped while waiting.
    pub async fn wait_connected(&self) -> ClientResult<()> {
        let mut events = self.inner.events.subscribe();
        loop {
            {
                let state = self.inner.state.lock();
                if state.connection.state().is_connected() {
                    return Ok(());
                }
                if let Some(version) = state.rejected {
                    return Err(rejected(version));
                }
            }
            match events.recv().await {
                Ok(ParticipantEvent::ConnectionStateChanged {
                    new: ConnectionState::Connected,
                    ..
                }) => return Ok(()),
                Ok(ParticipantEvent::ProtocolRejected { version }) => return Err(rejected(version)),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Cancelled),
            }
        }
    }

    /// Current handshake state.
    pub fn handshake_state(&self) -> ClientHandshakeState {
        self.inner.state.lock().handshake.state()
    }

    /// Identity the server announced in its last hello.
    pub fn server_identity(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .handshake
            .server_identity()
            .map(str::to_string)
    }

    /// Current server endpoint.
    pub fn endpoint(&self) -> Endpoint {
        self.inner.socket.endpoint()
    }

    /// Re-targets the client. Reconnects immediately if connected.
    pub fn set_endpoint(&self, endpoint: Endpoint) {
        self.inner.socket.set_endpoint(endpoint);
    }

    /// Re-targets the client to `address`, which may carry a port.
    ///
    /// # Errors
    ///
    /// `Core(InvalidEndpoint)` if the address cannot be parsed.
    pub fn set_address(&self, address: &str) -> ClientResult<()> {
        let current = self.inner.socket.endpoint();
        let endpoint = Endpoint::parse(address, current.port)?;
        self.inner.socket.set_endpoint(endpoint);
        Ok(())
    }

    /// Re-targets the client to another port.
    pub fn set_port(&self, port: u16) {
        self.inner.socket.set_port(port);
    }

    /// Number of entries still waiting for a server id.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().store.pending_count()
    }
}

fn rejected(version: ProtocolVersion) -> ClientError {
    ClientError::ProtocolUnsupported {
        major: version.major,
        minor: version.minor,
    }
}

impl ClientInner {
    /// Encodes and queues messages. Called with the state lock held so the
    /// wire order matches processing order.
    fn send_all(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(message = message.name(), error = %err, "failed to encode message");
                    continue;
                }
            };
            if let Err(err) = self.socket.send(bytes) {
                debug!(message = message.name(), error = %err, "message not sent");
            }
        }
    }

    /// Queues a store-produced message if the handshake is done.
    fn send_if_online(&self, state: &ClientState, message: Option<Message>) {
        if state.handshake.is_complete() {
            self.send_all(message);
        }
    }

    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Data(bytes) => self.on_data(&bytes),
            TransportEvent::Closed { requested } => {
                debug!(requested, "transport closed");
                self.on_closed();
            }
            TransportEvent::ReconnectAttempt { attempt } => {
                self.events
                    .emit(ParticipantEvent::ReconnectAttempt { attempt });
            }
        }
    }

    fn on_connected(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.frames.clear();
        state.resyncing = false;
        state.connection.transition(ConnectionState::Connecting);
        let hello = state.handshake.begin(&mut state.store);
        self.send_all([hello]);
    }

    fn on_closed(&self) {
        let mut state = self.state.lock();
        state.connection.transition(ConnectionState::NotConnected);
        state.handshake.reset();
        state.frames.clear();
        state.resyncing = false;
    }

    fn on_data(&self, bytes: &[u8]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.resyncing {
            return;
        }
        state.frames.extend_from_slice(bytes);

        let mut offset = 0;
        loop {
            match next_message(&state.frames, offset) {
                Ok(Some((message, next))) => {
                    offset = next;
                    debug!(message = message.name(), "received");
                    self.on_message(state, message);
                    if state.resyncing {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "malformed stream, reconnecting");
                    state.frames.clear();
                    state.resyncing = true;
                    self.socket.disconnect();
                    self.socket.connect();
                    return;
                }
            }
        }
        state.frames.advance(offset);
    }

    fn on_message(&self, state: &mut ClientState, message: Message) {
        if state.handshake.is_complete() {
            state.store.apply_remote(message);
            return;
        }
        match state.handshake.handle_message(message, &mut state.store) {
            HandshakeStep::Continue => {}
            HandshakeStep::Complete(outbound) => {
                self.send_all(outbound);
                state.connection.transition(ConnectionState::Connected);
            }
            HandshakeStep::Rejected(version) => {
                state.rejected = Some(version);
                self.events
                    .emit(ParticipantEvent::ProtocolRejected { version });
                state.connection.transition(ConnectionState::NotConnected);
                state.resyncing = true;
                self.socket.disconnect();
            }
            HandshakeStep::Ignored(_) => {}
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        self.socket.disconnect();
    }
}

/// Applies transport events to the client until either side goes away.
async fn pump(client: Weak<ClientInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        client.on_transport_event(event);
    }
}

async fn keep_alive(client: Weak<ClientInner>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(client) = client.upgrade() else {
            break;
        };
        let state = client.state.lock();
        if state.connection.state().is_connected() {
            client.send_all([Message::KeepAlive]);
        }
    }
}

impl Participant for Client {
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
        let mut state = self.inner.state.lock();
        match state.store.set_local(name, value) {
            Ok(message) => {
                self.inner.send_if_online(&state, message);
                true
            }
            Err(err) => {
                debug!(error = %err, "write rejected");
                false
            }
        }
    }

    fn set_entry_flags(&self, name: &str, flags: EntryFlags) -> bool {
        let mut state = self.inner.state.lock();
        match state.store.set_flags_local(name, flags) {
            Ok(message) => {
                self.inner.send_if_online(&state, message);
                true
            }
            Err(_) => false,
        }
    }

    fn delete_entry(&self, name: &str) -> bool {
        let mut state = self.inner.state.lock();
        match state.store.delete_local(name) {
            Ok(message) => {
                self.inner.send_if_online(&state, message);
                true
            }
            Err(_) => false,
        }
    }

    fn clear_all(&self) {
        let mut state = self.inner.state.lock();
        let message = state.store.clear_all_local();
        self.inner.send_if_online(&state, Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntables_core::CoreError;
    use std::time::Duration;

    fn offline_client() -> Client {
        Client::new(
            ClientConfig::new("test", Endpoint::new("127.0.0.1", 1))
                .with_reconnect_delay(Duration::from_millis(20)),
        )
    }

    #[test]
    fn offline_writes_stay_pending() {
        let client = offline_client();
        assert!(client.set_double("/a", 1.0));
        assert!(client.set_string("/b", "x"));
        assert!(!client.set_boolean("/a", true));

        assert_eq!(client.pending_count(), 2);
        assert_eq!(client.get_double("/a").unwrap(), 1.0);
        assert!(matches!(
            client.get_boolean("/a"),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert_eq!(client.connection_state(), ConnectionState::NotConnected);
        assert_eq!(client.handshake_state(), ClientHandshakeState::NotConnected);
    }

    #[test]
    fn offline_delete_and_flags() {
        let client = offline_client();
        client.set_double("/a", 1.0);
        assert!(client.set_entry_flags("/a", EntryFlags::persistent()));
        assert!(client.entry("/a").unwrap().flags.persistent);
        assert!(client.delete_entry("/a"));
        assert!(!client.delete_entry("/a"));
        assert!(!client.set_entry_flags("/a", EntryFlags::default()));
    }

    #[test]
    fn retarget_while_stopped() {
        let client = offline_client();
        client.set_address("tcp://10.0.0.5:1800").unwrap();
        assert_eq!(client.endpoint(), Endpoint::new("10.0.0.5", 1800));
        client.set_port(1735);
        assert_eq!(client.endpoint().port, 1735);
        assert!(client.set_address("").is_err());
    }

    #[tokio::test]
    async fn reconnect_attempts_surface_as_events() {
        let client = offline_client();
        let mut events = client.subscribe();
        client.start();

        let attempt = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(ParticipantEvent::ReconnectAttempt { attempt }) = events.recv().await {
                    return attempt;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(attempt, 1);
        client.stop();
    }
}
