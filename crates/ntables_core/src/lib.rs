//! # NetworkTables Core
//!
//! Participant base for NetworkTables clients and servers.
//!
//! This crate provides:
//! - `Participant`, the typed key-value contract both sides implement
//! - `ConnectionStateMachine` and `ConnectionState`
//! - `ParticipantEvent` and the `EventBus` that delivers them
//! - `Endpoint` parsing for `host[:port]` addresses
//!
//! There is no networking here; see `ntables_client` and `ntables_server`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoint;
mod error;
mod events;
mod participant;
mod types;

pub use endpoint::Endpoint;
pub use error::{CoreError, CoreResult};
pub use events::{EntryEvent, EventBus, EventSource, ParticipantEvent, DEFAULT_EVENT_CAPACITY};
pub use participant::{ConnectionStateMachine, Participant};
pub use types::{ConnectionState, ProtocolVersion};

// Re-export the entry model so downstream crates need only one import.
pub use ntables_protocol::{Entry, EntryFlags, EntryType, EntryValue, DEFAULT_PORT, PENDING_ID};
