//! Client side of the v3 handshake.
//!
//! ```text
//! client                         server
//!   CLIENT_HELLO          ->
//!                         <-     SERVER_HELLO
//!                         <-     ENTRY_ASSIGNMENT *
//!                         <-     SERVER_HELLO_COMPLETE
//!   ENTRY_ASSIGNMENT *    ->     (entries the server did not know)
//!   CLIENT_HELLO_COMPLETE ->
//! ```

use crate::store::ClientStore;
use ntables_core::ProtocolVersion;
use ntables_protocol::{ClientHello, Message, PROTOCOL_MAJOR, PROTOCOL_MINOR};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Where the client is in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientHandshakeState {
    /// No attempt in progress.
    #[default]
    NotConnected,
    /// `CLIENT_HELLO` sent.
    AwaitServerHello,
    /// Receiving the server's entries.
    AwaitServerEntries,
    /// Done; messages go to the store.
    Complete,
}

/// What the caller should do after feeding a message to the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeStep {
    /// Consumed; keep feeding messages.
    Continue,
    /// Finished. Send these messages; the client is now connected.
    Complete(Vec<Message>),
    /// The server refused our protocol version.
    Rejected(ProtocolVersion),
    /// Not a handshake message in the current state.
    Ignored(Message),
}

/// Drives the handshake against a [`ClientStore`].
#[derive(Debug)]
pub struct ClientHandshake {
    identity: String,
    state: ClientHandshakeState,
    server_identity: Option<String>,
    announced: HashSet<String>,
}

impl ClientHandshake {
    /// Creates a handshake manager that introduces itself as `identity`.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            state: ClientHandshakeState::NotConnected,
            server_identity: None,
            announced: HashSet::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ClientHandshakeState {
        self.state
    }

    /// Returns true once the handshake has finished.
    pub fn is_complete(&self) -> bool {
        self.state == ClientHandshakeState::Complete
    }

    /// Identity the server announced, if it has said hello.
    pub fn server_identity(&self) -> Option<&str> {
        self.server_identity.as_deref()
    }

    /// Abandons any attempt in progress.
    pub fn reset(&mut self) {
        self.state = ClientHandshakeState::NotConnected;
        self.server_identity = None;
        self.announced.clear();
    }

    /// Starts a new attempt and returns the `CLIENT_HELLO` to send.
    pub fn begin(&mut self, store: &mut ClientStore) -> Message {
        self.reset();
        store.begin_session();
        self.state = ClientHandshakeState::AwaitServerHello;
        debug!(identity = %self.identity, "sending client hello");
        Message::ClientHello(ClientHello {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            identity: self.identity.clone(),
        })
    }

    /// Feeds one received message into the handshake.
    pub fn handle_message(&mut self, message: Message, store: &mut ClientStore) -> HandshakeStep {
        match (self.state, message) {
            (ClientHandshakeState::AwaitServerHello, Message::ServerHello(hello)) => {
                debug!(
                    server = %hello.identity,
                    previously_seen = hello.client_previously_seen,
                    "server hello"
                );
                self.server_identity = Some(hello.identity);
                self.state = ClientHandshakeState::AwaitServerEntries;
                HandshakeStep::Continue
            }
            (
                ClientHandshakeState::AwaitServerHello,
                Message::ProtoVersionUnsupported { major, minor },
            ) => {
                let version = ProtocolVersion::new(major, minor);
                warn!(%version, "server rejected protocol 3.0");
                self.reset();
                HandshakeStep::Rejected(version)
            }
            (ClientHandshakeState::AwaitServerEntries, Message::EntryAssignment(assignment)) => {
                self.announced.insert(assignment.name.clone());
                store.apply_handshake_assignment(assignment);
                HandshakeStep::Continue
            }
            (ClientHandshakeState::AwaitServerEntries, Message::ServerHelloComplete) => {
                let mut outbound = store.reconcile(&self.announced);
                info!(
                    server_entries = self.announced.len(),
                    client_entries = outbound.len(),
                    "handshake complete"
                );
                outbound.push(Message::ClientHelloComplete);
                self.announced.clear();
                self.state = ClientHandshakeState::Complete;
                HandshakeStep::Complete(outbound)
            }
            (_, Message::KeepAlive) => HandshakeStep::Continue,
            (state, other) => {
                debug!(?state, message = other.name(), "unexpected message during handshake");
                HandshakeStep::Ignored(other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntables_core::{EntryValue, EventBus, PENDING_ID};
    use ntables_protocol::{EntryAssignment, EntryFlags, ServerHello};

    fn server_hello() -> Message {
        Message::ServerHello(ServerHello {
            client_previously_seen: false,
            identity: "server".into(),
        })
    }

    fn assignment(name: &str, id: u16, value: EntryValue) -> Message {
        Message::EntryAssignment(EntryAssignment::new(
            name,
            id,
            0,
            EntryFlags::default(),
            value,
        ))
    }

    #[test]
    fn begin_sends_hello() {
        let mut store = ClientStore::new(EventBus::default());
        let mut handshake = ClientHandshake::new("robot");
        let hello = handshake.begin(&mut store);
        assert_eq!(
            hello,
            Message::ClientHello(ClientHello {
                major: 3,
                minor: 0,
                identity: "robot".into()
            })
        );
        assert_eq!(handshake.state(), ClientHandshakeState::AwaitServerHello);
    }

    #[test]
    fn reconciles_pending_entries() {
        let mut store = ClientStore::new(EventBus::default());
        store.set_local("A", EntryValue::Double(1.0)).unwrap();

        let mut handshake = ClientHandshake::new("client");
        handshake.begin(&mut store);
        assert_eq!(
            handshake.handle_message(server_hello(), &mut store),
            HandshakeStep::Continue
        );
        assert_eq!(handshake.server_identity(), Some("server"));
        handshake.handle_message(assignment("B", 0, EntryValue::Boolean(true)), &mut store);
        handshake.handle_message(assignment("C", 1, EntryValue::String("c".into())), &mut store);
        assert_eq!(handshake.state(), ClientHandshakeState::AwaitServerEntries);

        let step = handshake.handle_message(Message::ServerHelloComplete, &mut store);
        assert_eq!(
            step,
            HandshakeStep::Complete(vec![
                assignment("A", PENDING_ID, EntryValue::Double(1.0)),
                Message::ClientHelloComplete,
            ])
        );
        assert!(handshake.is_complete());
        assert_eq!(store.get("B").unwrap().id, 0);
        assert_eq!(store.get("C").unwrap().id, 1);
        assert!(store.get("A").unwrap().is_pending());
    }

    #[test]
    fn server_entries_overwrite_local() {
        let mut store = ClientStore::new(EventBus::default());
        store.set_local("X", EntryValue::Double(1.0)).unwrap();

        let mut handshake = ClientHandshake::new("client");
        handshake.begin(&mut store);
        handshake.handle_message(server_hello(), &mut store);
        handshake.handle_message(assignment("X", 4, EntryValue::Double(7.0)), &mut store);
        let step = handshake.handle_message(Message::ServerHelloComplete, &mut store);

        assert_eq!(step, HandshakeStep::Complete(vec![Message::ClientHelloComplete]));
        assert_eq!(store.get("X").unwrap().value, EntryValue::Double(7.0));
        assert_eq!(store.get("X").unwrap().id, 4);
    }

    #[test]
    fn version_rejection() {
        let mut store = ClientStore::new(EventBus::default());
        let mut handshake = ClientHandshake::new("client");
        handshake.begin(&mut store);
        let step = handshake.handle_message(
            Message::ProtoVersionUnsupported { major: 2, minor: 0 },
            &mut store,
        );
        assert_eq!(step, HandshakeStep::Rejected(ProtocolVersion::new(2, 0)));
        assert_eq!(handshake.state(), ClientHandshakeState::NotConnected);
    }

    #[test]
    fn out_of_order_messages_are_ignored() {
        let mut store = ClientStore::new(EventBus::default());
        let mut handshake = ClientHandshake::new("client");
        handshake.begin(&mut store);

        let early = assignment("B", 0, EntryValue::Boolean(true));
        assert_eq!(
            handshake.handle_message(early.clone(), &mut store),
            HandshakeStep::Ignored(early)
        );
        assert!(store.is_empty());
        assert_eq!(
            handshake.handle_message(Message::KeepAlive, &mut store),
            HandshakeStep::Continue
        );
        assert_eq!(handshake.state(), ClientHandshakeState::AwaitServerHello);
    }

    #[test]
    fn begin_clears_previous_attempt() {
        let mut store = ClientStore::new(EventBus::default());
        let mut handshake = ClientHandshake::new("client");
        handshake.begin(&mut store);
        handshake.handle_message(server_hello(), &mut store);
        handshake.handle_message(assignment("B", 0, EntryValue::Boolean(true)), &mut store);

        // Connection drops mid-handshake; the next attempt must not remember "B".
        handshake.begin(&mut store);
        handshake.handle_message(server_hello(), &mut store);
        let step = handshake.handle_message(Message::ServerHelloComplete, &mut store);
        assert_eq!(
            step,
            HandshakeStep::Complete(vec![
                assignment("B", PENDING_ID, EntryValue::Boolean(true)),
                Message::ClientHelloComplete,
            ])
        );
    }
}
