//! The client's entry store.
//!
//! A sans-IO state machine: it applies local writes and remote messages,
//! emits [`ParticipantEvent`]s, and returns the messages the caller should
//! put on the wire. It never decides whether the wire is available.

use ntables_core::{
    CoreError, CoreResult, Entry, EntryEvent, EntryFlags, EntryValue, EventBus,
    ParticipantEvent, PENDING_ID,
};
use ntables_protocol::{EntryAssignment, EntryUpdate, Message};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Entries known to a client, keyed by name and indexed by server id.
pub struct ClientStore {
    entries: HashMap<String, Entry>,
    ids: HashMap<u16, String>,
    events: EventBus,
}

impl ClientStore {
    /// Creates an empty store reporting on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            entries: HashMap::new(),
            ids: HashMap::new(),
            events,
        }
    }

    /// Returns the named entry.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Returns the entry with server id `id`.
    pub fn get_by_id(&self, id: u16) -> Option<&Entry> {
        self.ids.get(&id).and_then(|name| self.entries.get(name))
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

    /// Number of entries, pending included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries still waiting for a server id.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_pending()).count()
    }

    fn emit(&self, event: ParticipantEvent) {
        self.events.emit(event);
    }

    /// Forgets every server id. Called at the start of a new session, since
    /// ids from an earlier session mean nothing to the next server.
    pub fn begin_session(&mut self) {
        self.ids.clear();
    }

    // --- local writes ---------------------------------------------------

    /// Writes a value from application code.
    ///
    /// Returns the message announcing the change, if any.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the entry exists with a different type; the store
    /// is unchanged.
    pub fn set_local(&mut self, name: &str, value: EntryValue) -> CoreResult<Option<Message>> {
        let Some(entry) = self.entries.get_mut(name) else {
            let entry = Entry::pending(name, value);
            let message = Message::EntryAssignment(EntryAssignment::new(
                name,
                PENDING_ID,
                0,
                entry.flags,
                entry.value.clone(),
            ));
            self.entries.insert(name.to_string(), entry.clone());
            self.emit(ParticipantEvent::EntryAdded(EntryEvent::local(entry)));
            return Ok(Some(message));
        };

        if entry.entry_type() != value.entry_type() {
            return Err(CoreError::TypeMismatch {
                name: name.to_string(),
                expected: value.entry_type(),
                actual: entry.entry_type(),
            });
        }

        if entry.is_pending() {
            entry.value = value;
            let snapshot = entry.clone();
            self.emit(ParticipantEvent::EntryUpdated(EntryEvent::local(snapshot)));
            return Ok(None);
        }

        if entry.value == value {
            return Ok(None);
        }
        entry.seq = entry.seq.wrapping_add(1);
        entry.value = value;
        let message = Message::EntryUpdate(EntryUpdate::new(entry.id, entry.seq, entry.value.clone()));
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryUpdated(EntryEvent::local(snapshot)));
        Ok(Some(message))
    }

    /// Replaces an entry's flags from application code.
    ///
    /// # Errors
    ///
    /// `EntryNotFound` if there is no such entry.
    pub fn set_flags_local(&mut self, name: &str, flags: EntryFlags) -> CoreResult<Option<Message>> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found(name))?;
        if entry.flags == flags {
            return Ok(None);
        }
        entry.flags = flags;
        let message = (!entry.is_pending()).then(|| Message::EntryFlagsUpdate { id: entry.id, flags });
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryFlagsUpdated(EntryEvent::local(snapshot)));
        Ok(message)
    }

    /// Deletes an entry from application code.
    ///
    /// # Errors
    ///
    /// `EntryNotFound` if there is no such entry.
    pub fn delete_local(&mut self, name: &str) -> CoreResult<Option<Message>> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| CoreError::not_found(name))?;
        let message = if entry.is_pending() {
            None
        } else {
            self.ids.remove(&entry.id);
            Some(Message::EntryDelete { id: entry.id })
        };
        self.emit(ParticipantEvent::EntryDeleted(EntryEvent::local(entry)));
        Ok(message)
    }

    /// Deletes every entry from application code.
    pub fn clear_all_local(&mut self) -> Message {
        for entry in self.drain() {
            self.emit(ParticipantEvent::EntryDeleted(EntryEvent::local(entry)));
        }
        Message::ClearAllEntries
    }

    fn drain(&mut self) -> Vec<Entry> {
        self.ids.clear();
        let mut removed: Vec<Entry> = self.entries.drain().map(|(_, e)| e).collect();
        removed.sort_by(|a, b| a.name.cmp(&b.name));
        removed
    }

    // --- remote messages ------------------------------------------------

    /// Applies a message received after the handshake completed.
    pub fn apply_remote(&mut self, message: Message) {
        match message {
            Message::EntryAssignment(assignment) => self.apply_assignment(assignment),
            Message::EntryUpdate(update) => self.apply_update(update),
            Message::EntryFlagsUpdate { id, flags } => {
                let Some(entry) = self.entry_by_id_mut(id) else {
                    debug!(id, "flags update for unknown entry");
                    return;
                };
                entry.flags = flags;
                let snapshot = entry.clone();
                self.emit(ParticipantEvent::EntryFlagsUpdated(EntryEvent::remote(snapshot)));
            }
            Message::EntryDelete { id } => {
                let Some(name) = self.ids.remove(&id) else {
                    debug!(id, "delete for unknown entry");
                    return;
                };
                if let Some(entry) = self.entries.remove(&name) {
                    self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(entry)));
                }
            }
            Message::ClearAllEntries => {
                for entry in self.drain() {
                    self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(entry)));
                }
            }
            Message::KeepAlive => {}
            other => debug!(message = other.name(), "ignoring message outside handshake"),
        }
    }

    fn entry_by_id_mut(&mut self, id: u16) -> Option<&mut Entry> {
        let name = self.ids.get(&id)?;
        self.entries.get_mut(name)
    }

    fn apply_update(&mut self, update: EntryUpdate) {
        let Some(entry) = self.entry_by_id_mut(update.id) else {
            debug!(id = update.id, "update for unknown entry");
            return;
        };
        if entry.entry_type() != update.value.entry_type() {
            debug!(
                id = update.id,
                expected = %entry.entry_type(),
                found = %update.value.entry_type(),
                "update with mismatched type"
            );
            return;
        }
        entry.value = update.value;
        entry.seq = update.seq;
        let snapshot = entry.clone();
        self.emit(ParticipantEvent::EntryUpdated(EntryEvent::remote(snapshot)));
    }

    /// Removes whatever entry currently holds server id `id` unless it is
    /// `keep`. Ids are unique within a store.
    fn evict_id(&mut self, id: u16, keep: &str) {
        if let Some(holder) = self.ids.get(&id) {
            if holder != keep {
                if let Some(name) = self.ids.remove(&id) {
                    if let Some(stale) = self.entries.remove(&name) {
                        self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(stale)));
                    }
                }
            }
        }
    }

    fn apply_assignment(&mut self, assignment: EntryAssignment) {
        if assignment.id == PENDING_ID {
            debug!(name = %assignment.name, "assignment without an id");
            return;
        }
        self.evict_id(assignment.id, &assignment.name);
        let incoming = entry_from_assignment(assignment);

        match self.entries.remove(&incoming.name) {
            None => {
                self.insert_assigned(incoming.clone());
                self.emit(ParticipantEvent::EntryAdded(EntryEvent::remote(incoming)));
            }
            Some(pending) if pending.is_pending() => {
                let changed = pending.value != incoming.value;
                self.insert_assigned(incoming.clone());
                let event = EntryEvent::remote(incoming);
                self.emit(if changed {
                    ParticipantEvent::EntryUpdated(event)
                } else {
                    ParticipantEvent::EntryAdded(event)
                });
            }
            Some(current)
                if current.id == incoming.id
                    && current.value == incoming.value
                    && current.flags == incoming.flags =>
            {
                debug!(name = %current.name, id = current.id, "duplicate assignment ignored");
                self.insert_assigned(current);
            }
            Some(old) => {
                if self.ids.get(&old.id) == Some(&old.name) {
                    self.ids.remove(&old.id);
                }
                self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(old)));
                self.insert_assigned(incoming.clone());
                self.emit(ParticipantEvent::EntryAdded(EntryEvent::remote(incoming)));
            }
        }
    }

    fn insert_assigned(&mut self, entry: Entry) {
        self.ids.insert(entry.id, entry.name.clone());
        self.entries.insert(entry.name.clone(), entry);
    }

    // --- handshake ------------------------------------------------------

    /// Takes the server's version of an entry during the handshake,
    /// overwriting any local entry of the same name.
    ///
    /// Events reflect what actually changed from the application's view.
    pub fn apply_handshake_assignment(&mut self, assignment: EntryAssignment) {
        if assignment.id == PENDING_ID {
            debug!(name = %assignment.name, "handshake assignment without an id");
            return;
        }
        self.evict_id(assignment.id, &assignment.name);
        let incoming = entry_from_assignment(assignment);
        let previous = self.entries.remove(&incoming.name);
        self.insert_assigned(incoming.clone());

        let Some(old) = previous else {
            self.emit(ParticipantEvent::EntryAdded(EntryEvent::remote(incoming)));
            return;
        };
        if old.entry_type() != incoming.entry_type() {
            self.emit(ParticipantEvent::EntryDeleted(EntryEvent::remote(old)));
            self.emit(ParticipantEvent::EntryAdded(EntryEvent::remote(incoming)));
        } else if old.value != incoming.value {
            self.emit(ParticipantEvent::EntryUpdated(EntryEvent::remote(incoming)));
        } else if old.flags != incoming.flags {
            self.emit(ParticipantEvent::EntryFlagsUpdated(EntryEvent::remote(incoming)));
        }
    }

    /// Resets every entry the server did not announce to pending and
    /// returns one assignment per such entry, sorted by name.
    pub fn reconcile(&mut self, announced: &HashSet<String>) -> Vec<Message> {
        let mut unknown: Vec<&mut Entry> = self
            .entries
            .values_mut()
            .filter(|e| !announced.contains(&e.name))
            .collect();
        unknown.sort_by(|a, b| a.name.cmp(&b.name));

        unknown
            .into_iter()
            .map(|entry| {
                entry.id = PENDING_ID;
                entry.seq = 0;
                Message::EntryAssignment(EntryAssignment::new(
                    entry.name.clone(),
                    PENDING_ID,
                    0,
                    entry.flags,
                    entry.value.clone(),
                ))
            })
            .collect()
    }
}

fn entry_from_assignment(assignment: EntryAssignment) -> Entry {
    Entry {
        name: assignment.name,
        id: assignment.id,
        value: assignment.value,
        seq: assignment.seq,
        flags: assignment.flags,
    }
}
