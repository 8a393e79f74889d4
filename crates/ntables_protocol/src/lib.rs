//! # NetworkTables Protocol
//!
//! Entry model and message codecs for NetworkTables protocol revision 3.0.
//!
//! This crate provides:
//! - `Entry`, `EntryType`, `EntryValue`, `EntryFlags`
//! - The v3 message set with per-message encode/decode
//! - `next_message` for framing a TCP byte stream
//! - `RpcDefinition` for RPC definition blobs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod messages;
mod rpc;

pub use entry::{Entry, EntryFlags, EntryType, EntryValue, PENDING_ID};
pub use messages::{
    next_message, ClientHello, EntryAssignment, EntryUpdate, Message, MessageType, RpcCall,
    ServerHello, CLEAR_ALL_MAGIC,
};
pub use rpc::{RpcDefinition, RpcParameter, RpcResult, RPC_DEFINITION_VERSION};

/// Protocol major version spoken by this crate.
pub const PROTOCOL_MAJOR: u8 = 3;

/// Protocol minor version spoken by this crate.
pub const PROTOCOL_MINOR: u8 = 0;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 1735;
