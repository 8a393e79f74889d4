//! # NetworkTables Client
//!
//! The client side of NetworkTables v3.
//!
//! This crate provides:
//! - `ResilientSocket`, a TCP transport that reconnects on its own and can
//!   be re-targeted while running
//! - `ClientHandshake`, the hello exchange that reconciles local entries
//!   with the server's table
//! - `ClientStore`, the sans-IO entry table
//! - `Client`, which ties the three together on tokio
//!
//! ## Offline writes
//!
//! Entries written before the server has assigned them an id are kept as
//! *pending*. On every handshake the server's entries overwrite local ones
//! with the same name, and pending entries the server did not mention are
//! announced to it. Nothing written while offline is lost unless the
//! server already holds a value under that name.
//!
//! ## Key Invariants
//!
//! - Ids from one session are never reused in the next
//! - Updates are only sent for entries the server has assigned
//! - Inbound messages are applied in arrival order

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod handshake;
mod store;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, TransportConfig, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_RECONNECT_DELAY};
pub use error::{ClientError, ClientResult, TransportError};
pub use handshake::{ClientHandshake, ClientHandshakeState, HandshakeStep};
pub use store::ClientStore;
pub use transport::{ResilientSocket, TransportEvent};
