//! The server's authoritative entry store.
//!
//! Like the client store this is sans-IO: every operation returns the
//! [`Delivery`]s the caller must route, and the store never touches a
//! socket. Per-connection handshake state lives here too so broadcast
//! targeting can be decided in one place.

use crate::connection::{ConnectionId, ServerHandshakeState};
use ntables_core::{
    CoreError, CoreResult, Entry, EntryEvent, EntryFlags, EntryType, EntryValue, EventBus,
    ParticipantEvent, PENDING_ID,
};
use ntables_protocol::{
    EntryAssignment, EntryUpdate, Message, RpcDefinition, ServerHello, PROTOCOL_MAJOR,
    PROTOCOL_MINOR,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Which connections a message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every connection that has said hello.
    All,
    /// Every connection that has said hello, except this one.
    AllExcept(ConnectionId),
    /// Only this connection, whatever its handshake state.
    Only(ConnectionId),
}

/// A message and where to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Recipients.
    pub target: Target,
    /// Message to send.
    pub message: Message,
}

impl Delivery {
    fn new(target: Target, message: Message) -> Self {
        Self { target, message }
    }
}

/// Entries known to the server, keyed by id.
pub struct ServerStore {
    identity: String,
    entries: BTreeMap<u16, Entry>,
    names: HashMap<String, u16>,
    rpc_definitions: HashMap<u16, RpcDefinition>,
    next_id: u16,
    connections: HashMap<ConnectionId, ServerHandshakeState>,
    events: EventBus,
}

impl ServerStore {
    /// Creates an empty store that introduces itself as `identity`.
    pub fn new(identity: impl Into<String>, events: EventBus) -> Self {
        Self {
            identity: identity.into(),
            entries: BTreeMap::new(),
            names: HashMap::new(),
            rpc_definitions: HashMap::new(),
            next_id: 0,
            connections: HashMap::new(),
            events,
        }
    }

    /// Returns the named entry.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.names.get(name).and_then(|id| self.entries.get(id))
    }

    /// Returns the entry with id `id`.
    pub fn get_by_id(&self, id: u16) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Entries whose name starts with `prefix`, sorted by name.
    pub fn with_prefix(&self, prefix: &str) -> Vec<Entry> {
        let mut found: Vec<Entry> = self
            .entries
            .values()
            .filter(|e| e.name.starts_with(prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parsed definition of the named RPC entry.
    pub fn rpc_definition(&self, name: &str) -> Option<&RpcDefinition> {
        self.names
            .get(name)
            .and_then(|id| self.rpc_definitions.get(id))
    }

    fn emit(&self, event: ParticipantEvent) {
        self.events.emit(event);
    }

    // --- connections ----------------------------------------------------

    /// Registers a freshly accepted connection.
    pub fn add_connection(&mut self, conn: ConnectionId) {
        self.connections
            .insert(conn, ServerHandshakeState::AwaitClientHello);
    }

    /// Forgets a closed connection.
    pub fn remove_connection(&mut self, conn: ConnectionId) {
        self.connections.remove(&conn);
    }

    /// Forgets every connection.
    pub fn clear_connections(&mut self) {
        self.connections.clear();
    }

    /// Handshake state of a connection.
    pub fn handshake_state(&self, conn: ConnectionId) -> Option<ServerHandshakeState> {
        self.connections.get(&conn).copied()
    }

    /// Connections a delivery to `target` reaches, in ascending order.
    pub fn recipients(&self, target: Target) -> Vec<ConnectionId> {
        if let Target::Only(conn) = target {
            return self
                .connections
                .contains_key(&conn)
                .then_some(conn)
                .into_iter()
                .collect();
        }
        let mut found: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, state)| **state != ServerHandshakeState::AwaitClientHello)
            .map(|(conn, _)| *conn)
            .filter(|conn| match target {
                Target::AllExcept(excluded) => *conn != excluded,
                _ => true,
            })
            .collect();
        found.sort();
        found
    }

    // --- remote messages ------------------------------------------------

    /// Applies one message received on `conn`.
    pub fn handle_message(&mut self, conn: ConnectionId, message: Message) -> Vec<Delivery> {
        let Some(state) = self.connections.get(&conn).copied() else {
            warn!(%conn, message = message.name(), "message from unknown connection");
            return Vec::new();
        };

        match (state, message) {
            (_, Message::KeepAlive) => Vec::new(),
            (ServerHandshakeState::AwaitClientHello, Message::ClientHello(hello)) => {
                if hello.major != PROTOCOL_MAJOR {
                    warn!(
                        %conn,
                        major = hello.major,
                        minor = hello.minor,
                        "unsupported protocol version"
                    );
                    return vec![Delivery::new(
                        Target::Only(conn),
                        Message::ProtoVersionUnsupported {
                            major: PROTOCOL_MAJOR,
                            minor: PROTOCOL_MINOR,
                        },
                    )];
                }
                info!(%conn, identity = %hello.identity, "client hello");
                self.connections
                    .insert(conn, ServerHandshakeState::AwaitClientHelloComplete);
                self.hello_reply(conn)
            }
            (ServerHandshakeState::AwaitClientHello, other) => {
                warn!(%conn, message = other.name(), "message before client hello, dropped");
                Vec::new()
            }
            (ServerHandshakeState::AwaitClientHelloComplete, Message::ClientHelloComplete) => {
                debug!(%conn, "client hello complete");
                self.connections
                    .insert(conn, ServerHandshakeState::Complete);
                Vec::new()
            }
            (_, Message::EntryAssignment(assignment)) => self.remote_assignment(conn, assignment),
            (_, Message::EntryUpdate(update)) => self.remote_update(conn, update),
            (_, Message::EntryFlagsUpdate { id, flags }) => self.remote_flags(conn, id, flags),
            (_, Message::EntryDelete { id }) => self.remote_delete(conn, id),
            (_, Message::ClearAllEntries) => {
                let removed = self.reset();
                info!(%conn, removed = removed.len(), "entries cleared by client");
                for entry in removed {
                    self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(entry)));
                }
                vec![Delivery::new(Target::AllExcept(conn), Message::ClearAllEntries)]
            }
            (_, Message::RpcExecute(call)) => {
                debug!(
                    %conn,
                    definition = call.definition_id,
                    call = call.unique_id,
                    "rpc execute dropped"
                );
                Vec::new()
            }
            (state, other) => {
                debug!(%conn, ?state, message = other.name(), "unexpected message, dropped");
                Vec::new()
            }
        }
    }

    fn hello_reply(&self, conn: ConnectionId) -> Vec<Delivery> {
        let to = Target::Only(conn);
        let mut out = Vec::with_capacity(self.entries.len() + 2);
        out.push(Delivery::new(
            to,
            Message::ServerHello(ServerHello {
                client_previously_seen: false,
                identity: self.identity.clone(),
            }),
        ));
        out.extend(
            self.entries
                .values()
                .map(|entry| Delivery::new(to, assignment_for(entry))),
        );
        out.push(Delivery::new(to, Message::ServerHelloComplete));
        out
    }

    fn remote_assignment(&mut self, conn: ConnectionId, assignment: EntryAssignment) -> Vec<Delivery> {
        if assignment.id != PENDING_ID {
            debug!(%conn, id = assignment.id, name = %assignment.name, "assignment with id ignored");
            return Vec::new();
        }
        // The originator already received the winning assignment in its
        // snapshot or as a broadcast.
        if let Some(existing) = self.get(&assignment.name) {
            debug!(%conn, name = %assignment.name, id = existing.id, "name already assigned, dropped");
            return Vec::new();
        }
        let Some(id) = self.allocate_id() else {
            warn!(%conn, name = %assignment.name, "entry ids exhausted, assignment dropped");
            return Vec::new();
        };

        let mut entry = Entry::new(assignment.name, id, 0, assignment.value);
        entry.flags = assignment.flags;
        debug!(%conn, name = %entry.name, id, "entry assigned");
        let message = assignment_for(&entry);
        self.insert(entry.clone());
        self.emit(ParticipantEvent::EntryAdded(EntryEvent::remote(entry)));
        vec![Delivery::new(Target::All, message)]
    }

    fn remote_update(&mut self, conn: ConnectionId, update: EntryUpdate) -> Vec<Delivery> {
        let Some(entry) = self.entries.get_mut(&update.id) else {
            debug!(%conn, id = update.id, "update for unknown id");
            return Vec::new();
        };
        if entry.entry_type() != update.value.entry_type() {
            warn!(
                %conn,
                name = %entry.name,
                expected = %entry.entry_type(),
                actual = %update.value.entry_type(),
                "update with wrong type, dropped"
            );
            return Vec::new();
        }
        if !entry.accepts_seq(update.seq) {
            debug!(%conn, name = %entry.name, seq = update.seq, current = entry.seq, "stale update");
            return Vec::new();
        }

        entry.seq = update.seq;
        entry.value = update.value;
        let message = Message::EntryUpdate(EntryUpdate::new(entry.id, entry.seq, entry.value.clone()));
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryUpdated(EntryEvent::remote(snapshot)));
        vec![Delivery::new(Target::AllExcept(conn), message)]
    }

    // Flags and deletes carry no sequence number, so the last one to arrive wins.
    fn remote_flags(&mut self, conn: ConnectionId, id: u16, flags: EntryFlags) -> Vec<Delivery> {
        let Some(entry) = self.entries.get_mut(&id) else {
            debug!(%conn, id, "flags update for unknown id");
            return Vec::new();
        };
        entry.flags = flags;
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryFlagsUpdated(EntryEvent::remote(snapshot)));
        vec![Delivery::new(
            Target::AllExcept(conn),
            Message::EntryFlagsUpdate { id, flags },
        )]
    }

    fn remote_delete(&mut self, conn: ConnectionId, id: u16) -> Vec<Delivery> {
        let Some(entry) = self.remove(id) else {
            debug!(%conn, id, "delete for unknown id");
            return Vec::new();
        };
        debug!(%conn, name = %entry.name, id, "entry deleted");
        self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(entry)));
        vec![Delivery::new(Target::AllExcept(conn), Message::EntryDelete { id })]
    }

    // --- local writes ---------------------------------------------------

    /// Writes a value from application code.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the entry exists with a different type,
    /// `IdsExhausted` if a new entry cannot be given an id.
    pub fn set_local(&mut self, name: &str, value: EntryValue) -> CoreResult<Vec<Delivery>> {
        let Some(id) = self.names.get(name).copied() else {
            let id = self.allocate_id().ok_or_else(|| CoreError::IdsExhausted {
                name: name.to_string(),
            })?;
            let entry = Entry::new(name, id, 0, value);
            let message = assignment_for(&entry);
            self.insert(entry.clone());
            self.emit(ParticipantEvent::EntryAdded(EntryEvent::local(entry)));
            return Ok(vec![Delivery::new(Target::All, message)]);
        };

        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(CoreError::not_found(name));
        };
        if entry.entry_type() != value.entry_type() {
            return Err(CoreError::TypeMismatch {
                name: name.to_string(),
                expected: value.entry_type(),
                actual: entry.entry_type(),
            });
        }
        if entry.value == value {
            return Ok(Vec::new());
        }
        entry.seq = entry.seq.wrapping_add(1);
        entry.value = value;
        let message = Message::EntryUpdate(EntryUpdate::new(entry.id, entry.seq, entry.value.clone()));
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryUpdated(EntryEvent::local(snapshot)));
        Ok(vec![Delivery::new(Target::All, message)])
    }

    /// Replaces an entry's flags from application code.
    ///
    /// # Errors
    ///
    /// `EntryNotFound` if there is no such entry.
    pub fn set_flags_local(&mut self, name: &str, flags: EntryFlags) -> CoreResult<Vec<Delivery>> {
        let entry = self
            .names
            .get(name)
            .and_then(|id| self.entries.get_mut(id))
            .ok_or_else(|| CoreError::not_found(name))?;
        if entry.flags == flags {
            return Ok(Vec::new());
        }
        entry.flags = flags;
        let message = Message::EntryFlagsUpdate { id: entry.id, flags };
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryFlagsUpdated(EntryEvent::local(snapshot)));
        Ok(vec![Delivery::new(Target::All, message)])
    }

    /// Deletes an entry from application code.
    ///
    /// # Errors
    ///
    /// `EntryNotFound` if there is no such entry.
    pub fn delete_local(&mut self, name: &str) -> CoreResult<Vec<Delivery>> {
        let id = self
            .names
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::not_found(name))?;
        let entry = self.remove(id).ok_or_else(|| CoreError::not_found(name))?;
        self.emit(ParticipantEvent::EntryDeleted(EntryEvent::local(entry)));
        Ok(vec![Delivery::new(Target::All, Message::EntryDelete { id })])
    }

    /// Deletes every entry from application code.
    pub fn clear_all_local(&mut self) -> Vec<Delivery> {
        for entry in self.reset() {
            self.emit(ParticipantEvent::EntryDeleted(EntryEvent::local(entry)));
        }
        vec![Delivery::new(Target::All, Message::ClearAllEntries)]
    }

    // --- bookkeeping ----------------------------------------------------

    /// Next free id at or after the allocator, skipping the sentinel.
    fn allocate_id(&mut self) -> Option<u16> {
        if self.entries.len() >= usize::from(PENDING_ID) {
            return None;
        }
        loop {
            let id = self.next_id;
            self.next_id = match id.wrapping_add(1) {
                PENDING_ID => 0,
                next => next,
            };
            if !self.entries.contains_key(&id) {
                return Some(id);
            }
        }
    }

    fn insert(&mut self, entry: Entry) {
        if entry.entry_type() == EntryType::Rpc {
            self.store_rpc_definition(&entry);
        }
        self.names.insert(entry.name.clone(), entry.id);
        self.entries.insert(entry.id, entry);
    }

    fn store_rpc_definition(&mut self, entry: &Entry) {
        let EntryValue::Rpc(blob) = &entry.value else {
            return;
        };
        match RpcDefinition::parse(blob) {
            Ok(definition) => {
                debug!(
                    name = %entry.name,
                    rpc = %definition.name,
                    parameters = definition.parameters.len(),
                    results = definition.results.len(),
                    "rpc definition stored"
                );
                self.rpc_definitions.insert(entry.id, definition);
            }
            Err(err) => warn!(name = %entry.name, error = %err, "unparseable rpc definition"),
        }
    }

    fn remove(&mut self, id: u16) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.names.remove(&entry.name);
        self.rpc_definitions.remove(&id);
        Some(entry)
    }

    /// Drops every entry and restarts id allocation at zero.
    fn reset(&mut self) -> Vec<Entry> {
        self.names.clear();
        self.rpc_definitions.clear();
        self.next_id = 0;
        let mut removed: Vec<Entry> = std::mem::take(&mut self.entries).into_values().collect();
        removed.sort_by(|a, b| a.name.cmp(&b.name));
        removed
    }
}

fn assignment_for(entry: &Entry) -> Message {
    Message::EntryAssignment(EntryAssignment::new(
        entry.name.clone(),
        entry.id,
        entry.seq,
        entry.flags,
        entry.value.clone(),
    ))
}
