//! # NetworkTables Server
//!
//! The authoritative side of NetworkTables v3.
//!
//! This crate provides:
//! - `ServerStore`, the sans-IO entry table: id allocation, sequence
//!   arbitration and broadcast targeting
//! - `FrameReader` and per-connection handshake tracking
//! - `Server`, which runs the store behind a tokio `TcpListener`
//!
//! # Broadcast rules
//!
//! | Received from a client | Sent to |
//! |---|---|
//! | `ENTRY_ASSIGNMENT` (new name) | every client, sender included |
//! | `ENTRY_ASSIGNMENT` (known name) | nobody; dropped |
//! | `ENTRY_UPDATE` (newer seq) | every other client |
//! | `ENTRY_FLAGS_UPDATE`, `ENTRY_DELETE` | every other client |
//! | `CLEAR_ALL_ENTRIES` | every other client |
//!
//! Writes made on the server itself go to every client. Clients that have
//! not sent `CLIENT_HELLO` receive nothing but direct replies.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connection;
mod error;
mod server;
mod store;

pub use config::ServerConfig;
pub use connection::{ConnectionId, FrameReader, Frames, ServerHandshakeState};
pub use error::{ServerError, ServerResult};
pub use server::Server;
pub use store::{Delivery, ServerStore, Target};
