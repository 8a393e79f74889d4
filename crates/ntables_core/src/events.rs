//! Participant events.
//!
//! Every store change and connection transition is published on an
//! [`EventBus`]. Subscribers receive events in the order they were emitted.
//!
//! # Usage
//!
//! ```
//! use ntables_core::{EntryEvent, EventBus, ParticipantEvent};
//! use ntables_protocol::{Entry, EntryValue};
//!
//! let bus = EventBus::new(16);
//! let mut events = bus.subscribe();
//!
//! let entry = Entry::pending("/speed", EntryValue::Double(1.0));
//! bus.emit(ParticipantEvent::EntryAdded(EntryEvent::local(entry)));
//!
//! assert!(matches!(events.try_recv(), Ok(ParticipantEvent::EntryAdded(_))));
//! ```

use crate::types::{ConnectionState, ProtocolVersion};
use ntables_protocol::Entry;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Application code on this participant.
    Local,
    /// A message from the network.
    Remote,
}

/// An entry change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryEvent {
    /// Origin of the change.
    pub source: EventSource,
    /// The entry after the change (or as it was, for deletes).
    pub entry: Entry,
}

impl EntryEvent {
    /// A change made by local application code.
    pub fn local(entry: Entry) -> Self {
        Self {
            source: EventSource::Local,
            entry,
        }
    }

    /// A change received from the network.
    pub fn remote(entry: Entry) -> Self {
        Self {
            source: EventSource::Remote,
            entry,
        }
    }
}

/// An event published by a client or server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ParticipantEvent {
    /// A new entry appeared.
    EntryAdded(EntryEvent),
    /// An entry's value changed.
    EntryUpdated(EntryEvent),
    /// An entry was removed.
    EntryDeleted(EntryEvent),
    /// An entry's flags changed.
    EntryFlagsUpdated(EntryEvent),
    /// The connection state changed.
    ConnectionStateChanged {
        /// State before.
        old: ConnectionState,
        /// State after.
        new: ConnectionState,
    },
    /// The server refused our protocol version.
    ProtocolRejected {
        /// Version the server supports.
        version: ProtocolVersion,
    },
    /// The transport is about to retry a connection.
    ReconnectAttempt {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
}

impl ParticipantEvent {
    /// Returns the entry this event is about, if any.
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            ParticipantEvent::EntryAdded(e)
            | ParticipantEvent::EntryUpdated(e)
            | ParticipantEvent::EntryDeleted(e)
            | ParticipantEvent::EntryFlagsUpdated(e) => Some(&e.entry),
            _ => None,
        }
    }

    /// Returns where an entry change came from.
    pub fn source(&self) -> Option<EventSource> {
        match self {
            ParticipantEvent::EntryAdded(e)
            | ParticipantEvent::EntryUpdated(e)
            | ParticipantEvent::EntryDeleted(e)
            | ParticipantEvent::EntryFlagsUpdated(e) => Some(e.source),
            _ => None,
        }
    }
}

/// Fan-out channel for [`ParticipantEvent`]s.
///
/// Emitting never blocks. A subscriber that falls more than the channel
/// capacity behind observes `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ParticipantEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ParticipantEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is fine.
    pub fn emit(&self, event: ParticipantEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntables_protocol::EntryValue;

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(ParticipantEvent::ReconnectAttempt { attempt: 1 });
        bus.emit(ParticipantEvent::ReconnectAttempt { attempt: 2 });

        assert_eq!(
            rx.try_recv().unwrap(),
            ParticipantEvent::ReconnectAttempt { attempt: 1 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ParticipantEvent::ReconnectAttempt { attempt: 2 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(ParticipantEvent::ReconnectAttempt { attempt: 1 });
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn entry_accessor() {
        let entry = Entry::pending("/x", EntryValue::Boolean(true));
        let event = ParticipantEvent::EntryDeleted(EntryEvent::remote(entry.clone()));
        assert_eq!(event.entry(), Some(&entry));
        let state = ParticipantEvent::ConnectionStateChanged {
            old: ConnectionState::NotConnected,
            new: ConnectionState::Connecting,
        };
        assert_eq!(state.entry(), None);
    }

    #[test]
    fn json_shape() {
        let event = ParticipantEvent::ConnectionStateChanged {
            old: ConnectionState::Connecting,
            new: ConnectionState::Connected,
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"connection_state_changed","old":"connecting","new":"connected"}"#
        );
    }
}
