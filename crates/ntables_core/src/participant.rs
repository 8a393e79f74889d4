//! The participant contract shared by clients and servers.

use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, ParticipantEvent};
use crate::types::ConnectionState;
use ntables_protocol::{Entry, EntryFlags, EntryType, EntryValue};
use tokio::sync::broadcast;
use tracing::debug;

/// Tracks a participant's connection state and announces transitions.
///
/// `NotConnected -> Connecting -> Connected`; any state may fall back to
/// `NotConnected`. Setting the current state again does nothing.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    events: EventBus,
}

impl ConnectionStateMachine {
    /// Creates a machine in `NotConnected` that reports on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            state: ConnectionState::NotConnected,
            events,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves to `new`, emitting `ConnectionStateChanged` if it differs.
    ///
    /// Returns true if the state changed.
    pub fn transition(&mut self, new: ConnectionState) -> bool {
        let old = self.state;
        if old == new {
            return false;
        }
        debug!(%old, %new, "connection state change");
        self.state = new;
        self.events
            .emit(ParticipantEvent::ConnectionStateChanged { old, new });
        true
    }
}

fn typed<T>(
    name: &str,
    entry: Option<Entry>,
    expected: EntryType,
    extract: impl FnOnce(EntryValue) -> Option<T>,
) -> CoreResult<T> {
    let entry = entry.ok_or_else(|| CoreError::not_found(name))?;
    let actual = entry.entry_type();
    extract(entry.value).ok_or_else(|| CoreError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual,
    })
}

/// A NetworkTables participant: a client or a server.
///
/// Implementors provide the entry store surface; the typed accessors are
/// built on top of it.
pub trait Participant {
    /// Identity string sent during the handshake.
    fn identity(&self) -> String;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Subscribes to entry and connection events.
    fn subscribe(&self) -> broadcast::Receiver<ParticipantEvent>;

    /// Returns a snapshot of the named entry.
    fn entry(&self, name: &str) -> Option<Entry>;

    /// Returns snapshots of every entry whose name starts with `prefix`.
    fn entries_with_prefix(&self, prefix: &str) -> Vec<Entry>;

    /// Writes a value, creating the entry if needed.
    ///
    /// Returns false, with no effect, if an entry of that name already
    /// exists with a different type.
    fn set_entry_value(&self, name: &str, value: EntryValue) -> bool;

    /// Replaces an entry's flags. Returns false if there is no such entry.
    fn set_entry_flags(&self, name: &str, flags: EntryFlags) -> bool;

    /// Deletes an entry. Returns false if there is no such entry.
    fn delete_entry(&self, name: &str) -> bool;

    /// Deletes every entry.
    fn clear_all(&self);

    /// Returns the value of the named entry, whatever its type.
    fn get_value(&self, name: &str) -> CoreResult<EntryValue> {
        self.entry(name)
            .map(|e| e.value)
            .ok_or_else(|| CoreError::not_found(name))
    }

    /// Writes a boolean.
    fn set_boolean(&self, name: &str, value: bool) -> bool {
        self.set_entry_value(name, EntryValue::Boolean(value))
    }

    /// Reads a boolean.
    fn get_boolean(&self, name: &str) -> CoreResult<bool> {
        typed(name, self.entry(name), EntryType::Boolean, |v| match v {
            EntryValue::Boolean(b) => Some(b),
            _ => None,
        })
    }

    /// Writes a double.
    fn set_double(&self, name: &str, value: f64) -> bool {
        self.set_entry_value(name, EntryValue::Double(value))
    }

    /// Reads a double.
    fn get_double(&self, name: &str) -> CoreResult<f64> {
        typed(name, self.entry(name), EntryType::Double, |v| match v {
            EntryValue::Double(d) => Some(d),
            _ => None,
        })
    }

    /// Writes a string.
    fn set_string(&self, name: &str, value: &str) -> bool {
        self.set_entry_value(name, EntryValue::String(value.to_string()))
    }

    /// Reads a string.
    fn get_string(&self, name: &str) -> CoreResult<String> {
        typed(name, self.entry(name), EntryType::String, |v| match v {
            EntryValue::String(s) => Some(s),
            _ => None,
        })
    }

    /// Writes a boolean array.
    fn set_boolean_array(&self, name: &str, value: Vec<bool>) -> bool {
        self.set_entry_value(name, EntryValue::BooleanArray(value))
    }

    /// Reads a boolean array.
    fn get_boolean_array(&self, name: &str) -> CoreResult<Vec<bool>> {
        typed(name, self.entry(name), EntryType::BooleanArray, |v| match v {
            EntryValue::BooleanArray(a) => Some(a),
            _ => None,
        })
    }

    /// Writes a double array.
    fn set_double_array(&self, name: &str, value: Vec<f64>) -> bool {
        self.set_entry_value(name, EntryValue::DoubleArray(value))
    }

    /// Reads a double array.
    fn get_double_array(&self, name: &str) -> CoreResult<Vec<f64>> {
        typed(name, self.entry(name), EntryType::DoubleArray, |v| match v {
            EntryValue::DoubleArray(a) => Some(a),
            _ => None,
        })
    }

    /// Writes a string array.
    fn set_string_array(&self, name: &str, value: Vec<String>) -> bool {
        self.set_entry_value(name, EntryValue::StringArray(value))
    }

    /// Reads a string array.
    fn get_string_array(&self, name: &str) -> CoreResult<Vec<String>> {
        typed(name, self.entry(name), EntryType::StringArray, |v| match v {
            EntryValue::StringArray(a) => Some(a),
            _ => None,
        })
    }

    /// Writes raw bytes.
    fn set_raw(&self, name: &str, value: Vec<u8>) -> bool {
        self.set_entry_value(name, EntryValue::Raw(value))
    }

    /// Reads raw bytes.
    fn get_raw(&self, name: &str) -> CoreResult<Vec<u8>> {
        typed(name, self.entry(name), EntryType::Raw, |v| match v {
            EntryValue::Raw(r) => Some(r),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// In-memory participant with no networking.
    struct LocalTable {
        entries: Mutex<BTreeMap<String, Entry>>,
        state: Mutex<ConnectionStateMachine>,
        events: EventBus,
    }

    impl LocalTable {
        fn new() -> Self {
            let events = EventBus::default();
            Self {
                entries: Mutex::new(BTreeMap::new()),
                state: Mutex::new(ConnectionStateMachine::new(events.clone())),
                events,
            }
        }
    }

    impl Participant for LocalTable {
        fn identity(&self) -> String {
            "local".into()
        }

        fn connection_state(&self) -> ConnectionState {
            self.state.lock().state()
        }

        fn subscribe(&self) -> broadcast::Receiver<ParticipantEvent> {
            self.events.subscribe()
        }

        fn entry(&self, name: &str) -> Option<Entry> {
            self.entries.lock().get(name).cloned()
        }

        fn entries_with_prefix(&self, prefix: &str) -> Vec<Entry> {
            self.entries
                .lock()
                .values()
                .filter(|e| e.name.starts_with(prefix))
                .cloned()
                .collect()
        }

        fn set_entry_value(&self, name: &str, value: EntryValue) -> bool {
            let mut entries = self.entries.lock();
            match entries.get_mut(name) {
                Some(e) if e.entry_type() != value.entry_type() => false,
                Some(e) => {
                    e.value = value;
                    true
                }
                None => {
                    entries.insert(name.to_string(), Entry::pending(name, value));
                    true
                }
            }
        }

        fn set_entry_flags(&self, name: &str, flags: EntryFlags) -> bool {
            match self.entries.lock().get_mut(name) {
                Some(e) => {
                    e.flags = flags;
                    true
                }
                None => false,
            }
        }

        fn delete_entry(&self, name: &str) -> bool {
            self.entries.lock().remove(name).is_some()
        }

        fn clear_all(&self) {
            self.entries.lock().clear();
        }
    }

    #[test]
    fn state_machine_transitions() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut machine = ConnectionStateMachine::new(bus);

        assert!(!machine.transition(ConnectionState::NotConnected));
        assert!(machine.transition(ConnectionState::Connecting));
        assert!(!machine.transition(ConnectionState::Connecting));
        assert!(machine.transition(ConnectionState::Connected));
        assert!(machine.transition(ConnectionState::NotConnected));

        let expected = [
            (ConnectionState::NotConnected, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Connected),
            (ConnectionState::Connected, ConnectionState::NotConnected),
        ];
        for (old, new) in expected {
            assert_eq!(
                rx.try_recv().unwrap(),
                ParticipantEvent::ConnectionStateChanged { old, new }
            );
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn typed_accessors() {
        let table = LocalTable::new();
        assert!(table.set_boolean("/b", true));
        assert!(table.set_double("/d", 2.5));
        assert!(table.set_string("/s", "hi"));
        assert!(table.set_boolean_array("/ba", vec![true, false]));
        assert!(table.set_double_array("/da", vec![1.0]));
        assert!(table.set_string_array("/sa", vec!["x".into()]));
        assert!(table.set_raw("/r", vec![9]));

        assert!(table.get_boolean("/b").unwrap());
        assert_eq!(table.get_double("/d").unwrap(), 2.5);
        assert_eq!(table.get_string("/s").unwrap(), "hi");
        assert_eq!(table.get_boolean_array("/ba").unwrap(), vec![true, false]);
        assert_eq!(table.get_double_array("/da").unwrap(), vec![1.0]);
        assert_eq!(table.get_string_array("/sa").unwrap(), vec!["x".to_string()]);
        assert_eq!(table.get_raw("/r").unwrap(), vec![9]);
        assert_eq!(table.get_value("/d").unwrap(), EntryValue::Double(2.5));
    }

    #[test]
    fn missing_and_mismatched() {
        let table = LocalTable::new();
        assert_eq!(table.get_double("/nope"), Err(CoreError::not_found("/nope")));

        table.set_string("/s", "text");
        assert_eq!(
            table.get_double("/s"),
            Err(CoreError::TypeMismatch {
                name: "/s".into(),
                expected: EntryType::Double,
                actual: EntryType::String,
            })
        );
        assert!(!table.set_double("/s", 1.0));
        assert_eq!(table.get_string("/s").unwrap(), "text");
    }

    #[test]
    fn prefix_listing() {
        let table = LocalTable::new();
        table.set_double("/drive/left", 1.0);
        table.set_double("/drive/right", 1.0);
        table.set_double("/arm/angle", 1.0);
        let names: Vec<String> = table
            .entries_with_prefix("/drive/")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["/drive/left", "/drive/right"]);
    }
}
