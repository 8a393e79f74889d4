//! NetworkTables v3 messages.
//!
//! Every message starts with a one-byte type tag. Each payload type has
//! its own struct with `encode` and `decode`; [`Message`] ties them
//! together and [`next_message`] frames a byte stream.

use crate::entry::{EntryFlags, EntryType, EntryValue};
use bytes::Bytes;
use ntables_codec::{CodecError, CodecResult, WireDecoder, WireEncoder};

/// Magic value carried by `CLEAR_ALL_ENTRIES`.
pub const CLEAR_ALL_MAGIC: u32 = 0xD06C_B27A;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `KEEP_ALIVE`
    KeepAlive,
    /// `CLIENT_HELLO`
    ClientHello,
    /// `PROTO_VERSION_UNSUPPORTED`
    ProtoVersionUnsupported,
    /// `SERVER_HELLO_COMPLETE`
    ServerHelloComplete,
    /// `SERVER_HELLO`
    ServerHello,
    /// `CLIENT_HELLO_COMPLETE`
    ClientHelloComplete,
    /// `ENTRY_ASSIGNMENT`
    EntryAssignment,
    /// `ENTRY_UPDATE`
    EntryUpdate,
    /// `ENTRY_FLAGS_UPDATE`
    EntryFlagsUpdate,
    /// `ENTRY_DELETE`
    EntryDelete,
    /// `CLEAR_ALL_ENTRIES`
    ClearAllEntries,
    /// `RPC_EXECUTE`
    RpcExecute,
    /// `RPC_RESPONSE`
    RpcResponse,
}

impl MessageType {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            MessageType::KeepAlive => 0x00,
            MessageType::ClientHello => 0x01,
            MessageType::ProtoVersionUnsupported => 0x02,
            MessageType::ServerHelloComplete => 0x03,
            MessageType::ServerHello => 0x04,
            MessageType::ClientHelloComplete => 0x05,
            MessageType::EntryAssignment => 0x10,
            MessageType::EntryUpdate => 0x11,
            MessageType::EntryFlagsUpdate => 0x12,
            MessageType::EntryDelete => 0x13,
            MessageType::ClearAllEntries => 0x14,
            MessageType::RpcExecute => 0x20,
            MessageType::RpcResponse => 0x21,
        }
    }

    /// Creates from a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(MessageType::KeepAlive),
            0x01 => Some(MessageType::ClientHello),
            0x02 => Some(MessageType::ProtoVersionUnsupported),
            0x03 => Some(MessageType::ServerHelloComplete),
            0x04 => Some(MessageType::ServerHello),
            0x05 => Some(MessageType::ClientHelloComplete),
            0x10 => Some(MessageType::EntryAssignment),
            0x11 => Some(MessageType::EntryUpdate),
            0x12 => Some(MessageType::EntryFlagsUpdate),
            0x13 => Some(MessageType::EntryDelete),
            0x14 => Some(MessageType::ClearAllEntries),
            0x20 => Some(MessageType::RpcExecute),
            0x21 => Some(MessageType::RpcResponse),
            _ => None,
        }
    }

    /// Name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::KeepAlive => "KEEP_ALIVE",
            MessageType::ClientHello => "CLIENT_HELLO",
            MessageType::ProtoVersionUnsupported => "PROTO_VERSION_UNSUPPORTED",
            MessageType::ServerHelloComplete => "SERVER_HELLO_COMPLETE",
            MessageType::ServerHello => "SERVER_HELLO",
            MessageType::ClientHelloComplete => "CLIENT_HELLO_COMPLETE",
            MessageType::EntryAssignment => "ENTRY_ASSIGNMENT",
            MessageType::EntryUpdate => "ENTRY_UPDATE",
            MessageType::EntryFlagsUpdate => "ENTRY_FLAGS_UPDATE",
            MessageType::EntryDelete => "ENTRY_DELETE",
            MessageType::ClearAllEntries => "CLEAR_ALL_ENTRIES",
            MessageType::RpcExecute => "RPC_EXECUTE",
            MessageType::RpcResponse => "RPC_RESPONSE",
        }
    }

    /// Smallest possible encoded size, type byte included.
    pub fn min_len(self) -> usize {
        match self {
            MessageType::KeepAlive
            | MessageType::ServerHelloComplete
            | MessageType::ClientHelloComplete => 1,
            MessageType::ProtoVersionUnsupported
            | MessageType::ServerHello
            | MessageType::EntryDelete => 3,
            MessageType::ClientHello | MessageType::EntryFlagsUpdate => 4,
            MessageType::ClearAllEntries => 5,
            MessageType::RpcExecute | MessageType::RpcResponse => 6,
            MessageType::EntryUpdate => 7,
            MessageType::EntryAssignment => 9,
        }
    }
}

/// Checks the minimum length and type tag, returning a decoder past the tag.
fn open(buf: &[u8], offset: usize, expected: MessageType) -> CodecResult<WireDecoder<'_>> {
    let mut dec = WireDecoder::at(buf, offset);
    dec.require(expected.min_len())?;
    let found = dec.read_u8()?;
    if found != expected.code() {
        return Err(CodecError::WrongMessageType {
            expected: expected.code(),
            found,
        });
    }
    Ok(dec)
}

fn check_value_type(declared: EntryType, value: &EntryValue) -> CodecResult<()> {
    if value.entry_type() != declared {
        return Err(CodecError::invalid_entry_value(format!(
            "declared type {declared} but value is {}",
            value.entry_type()
        )));
    }
    Ok(())
}

/// `CLIENT_HELLO`: first message a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Protocol major version.
    pub major: u8,
    /// Protocol minor version.
    pub minor: u8,
    /// Client identity string.
    pub identity: String,
}

impl ClientHello {
    /// Encodes into `enc`.
    pub fn encode(&self, enc: &mut WireEncoder) {
        enc.put_u8(MessageType::ClientHello.code());
        enc.put_u8(self.major);
        enc.put_u8(self.minor);
        enc.put_string(&self.identity);
    }

    /// Decodes from `buf` at `offset`.
    pub fn decode(buf: &[u8], offset: usize) -> CodecResult<(Self, usize)> {
        let mut dec = open(buf, offset, MessageType::ClientHello)?;
        let major = dec.read_u8()?;
        let minor = dec.read_u8()?;
        let identity = dec.read_string()?;
        Ok((
            Self {
                major,
                minor,
                identity,
            },
            dec.position(),
        ))
    }
}

/// `SERVER_HELLO`: the server's reply to a supported `CLIENT_HELLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Whether the server has seen this client before.
    pub client_previously_seen: bool,
    /// Server identity string.
    pub identity: String,
}

impl ServerHello {
    const PREVIOUSLY_SEEN: u8 = 0x01;

    /// Encodes into `enc`.
    pub fn encode(&self, enc: &mut WireEncoder) {
        enc.put_u8(MessageType::ServerHello.code());
        enc.put_u8(if self.client_previously_seen {
            Self::PREVIOUSLY_SEEN
        } else {
            0
        });
        enc.put_string(&self.identity);
    }

    /// Decodes from `buf` at `offset`.
    pub fn decode(buf: &[u8], offset: usize) -> CodecResult<(Self, usize)> {
        let mut dec = open(buf, offset, MessageType::ServerHello)?;
        let flags = dec.read_u8()?;
        let identity = dec.read_string()?;
        Ok((
            Self {
                client_previously_seen: flags & Self::PREVIOUSLY_SEEN != 0,
                identity,
            },
            dec.position(),
        ))
    }
}

/// `ENTRY_ASSIGNMENT`: announces an entry's name, id, type, and value.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryAssignment {
    /// Entry name.
    pub name: String,
    /// Declared type; must match `value`.
    pub entry_type: EntryType,
    /// Entry id, or the pending sentinel when a client creates an entry.
    pub id: u16,
    /// Sequence number.
    pub seq: u16,
    /// Flags.
    pub flags: EntryFlags,
    /// Value.
    pub value: EntryValue,
}

impl EntryAssignment {
    /// Builds an assignment whose declared type is taken from `value`.
    pub fn new(
        name: impl Into<String>,
        id: u16,
        seq: u16,
        flags: EntryFlags,
        value: EntryValue,
    ) -> Self {
        Self {
            name: name.into(),
            entry_type: value.entry_type(),
            id,
            seq,
            flags,
            value,
        }
    }

    /// Encodes into `enc`.
    ///
    /// # Errors
    ///
    /// `InvalidEntryValue` if the declared type does not match the value.
    pub fn encode(&self, enc: &mut WireEncoder) -> CodecResult<()> {
        check_value_type(self.entry_type, &self.value)?;
        enc.put_u8(MessageType::EntryAssignment.code());
        enc.put_string(&self.name);
        enc.put_u8(self.entry_type.code());
        enc.put_u16(self.id);
        enc.put_u16(self.seq);
        enc.put_u8(self.flags.to_byte());
        self.value.encode(enc)
    }

    /// Decodes from `buf` at `offset`.
    pub fn decode(buf: &[u8], offset: usize) -> CodecResult<(Self, usize)> {
        let mut dec = open(buf, offset, MessageType::EntryAssignment)?;
        let name = dec.read_string()?;
        let entry_type = EntryType::decode(dec.read_u8()?)?;
        let id = dec.read_u16()?;
        let seq = dec.read_u16()?;
        let flags = EntryFlags::from_byte(dec.read_u8()?);
        let value = EntryValue::decode(&mut dec, entry_type)?;
        Ok((
            Self {
                name,
                entry_type,
                id,
                seq,
                flags,
                value,
            },
            dec.position(),
        ))
    }
}

/// `ENTRY_UPDATE`: new value for an assigned entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate {
    /// Entry id.
    pub id: u16,
    /// Sequence number.
    pub seq: u16,
    /// Declared type; must match `value`.
    pub entry_type: EntryType,
    /// Value.
    pub value: EntryValue,
}

impl EntryUpdate {
    /// Builds an update whose declared type is taken from `value`.
    pub fn new(id: u16, seq: u16, value: EntryValue) -> Self {
        Self {
            id,
            seq,
            entry_type: value.entry_type(),
            value,
        }
    }

    /// Encodes into `enc`.
    ///
    /// # Errors
    ///
    /// `InvalidEntryValue` if the declared type does not match the value.
    pub fn encode(&self, enc: &mut WireEncoder) -> CodecResult<()> {
        check_value_type(self.entry_type, &self.value)?;
        enc.put_u8(MessageType::EntryUpdate.code());
        enc.put_u16(self.id);
        enc.put_u16(self.seq);
        enc.put_u8(self.entry_type.code());
        self.value.encode(enc)
    }

    /// Decodes from `buf` at `offset`.
    pub fn decode(buf: &[u8], offset: usize) -> CodecResult<(Self, usize)> {
        let mut dec = open(buf, offset, MessageType::EntryUpdate)?;
        let id = dec.read_u16()?;
        let seq = dec.read_u16()?;
        let entry_type = EntryType::decode(dec.read_u8()?)?;
        let value = EntryValue::decode(&mut dec, entry_type)?;
        Ok((
            Self {
                id,
                seq,
                entry_type,
                value,
            },
            dec.position(),
        ))
    }
}

/// `RPC_EXECUTE` and `RPC_RESPONSE` share one layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    /// Id of the RPC definition entry.
    pub definition_id: u16,
    /// Call id chosen by the caller.
    pub unique_id: u16,
    /// Encoded parameters or results.
    pub payload: Vec<u8>,
}

impl RpcCall {
    fn encode(&self, kind: MessageType, enc: &mut WireEncoder) {
        enc.put_u8(kind.code());
        enc.put_u16(self.definition_id);
        enc.put_u16(self.unique_id);
        enc.put_blob(&self.payload);
    }

    fn decode(buf: &[u8], offset: usize, kind: MessageType) -> CodecResult<(Self, usize)> {
        let mut dec = open(buf, offset, kind)?;
        let definition_id = dec.read_u16()?;
        let unique_id = dec.read_u16()?;
        let payload = dec.read_blob()?.to_vec();
        Ok((
            Self {
                definition_id,
                unique_id,
                payload,
            },
            dec.position(),
        ))
    }
}

/// A NetworkTables v3 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Keeps an idle connection alive.
    KeepAlive,
    /// Client greeting.
    ClientHello(ClientHello),
    /// Server does not speak the client's protocol version.
    ProtoVersionUnsupported {
        /// Server's major version.
        major: u8,
        /// Server's minor version.
        minor: u8,
    },
    /// Server finished sending its entries.
    ServerHelloComplete,
    /// Server greeting.
    ServerHello(ServerHello),
    /// Client finished sending its entries.
    ClientHelloComplete,
    /// Entry announcement.
    EntryAssignment(EntryAssignment),
    /// Entry value change.
    EntryUpdate(EntryUpdate),
    /// Entry flag change.
    EntryFlagsUpdate {
        /// Entry id.
        id: u16,
        /// New flags.
        flags: EntryFlags,
    },
    /// Entry removal.
    EntryDelete {
        /// Entry id.
        id: u16,
    },
    /// Removes every entry.
    ClearAllEntries,
    /// RPC invocation.
    RpcExecute(RpcCall),
    /// RPC result.
    RpcResponse(RpcCall),
}

impl Message {
    /// Returns the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::KeepAlive => MessageType::KeepAlive,
            Message::ClientHello(_) => MessageType::ClientHello,
            Message::ProtoVersionUnsupported { .. } => MessageType::ProtoVersionUnsupported,
            Message::ServerHelloComplete => MessageType::ServerHelloComplete,
            Message::ServerHello(_) => MessageType::ServerHello,
            Message::ClientHelloComplete => MessageType::ClientHelloComplete,
            Message::EntryAssignment(_) => MessageType::EntryAssignment,
            Message::EntryUpdate(_) => MessageType::EntryUpdate,
            Message::EntryFlagsUpdate { .. } => MessageType::EntryFlagsUpdate,
            Message::EntryDelete { .. } => MessageType::EntryDelete,
            Message::ClearAllEntries => MessageType::ClearAllEntries,
            Message::RpcExecute(_) => MessageType::RpcExecute,
            Message::RpcResponse(_) => MessageType::RpcResponse,
        }
    }

    /// Name used in log lines.
    pub fn name(&self) -> &'static str {
        self.message_type().name()
    }

    /// Appends the encoded message to `enc`.
    pub fn encode_into(&self, enc: &mut WireEncoder) -> CodecResult<()> {
        match self {
            Message::KeepAlive | Message::ServerHelloComplete | Message::ClientHelloComplete => {
                enc.put_u8(self.message_type().code());
            }
            Message::ClientHello(msg) => msg.encode(enc),
            Message::ProtoVersionUnsupported { major, minor } => {
                enc.put_u8(MessageType::ProtoVersionUnsupported.code());
                enc.put_u8(*major);
                enc.put_u8(*minor);
            }
            Message::ServerHello(msg) => msg.encode(enc),
            Message::EntryAssignment(msg) => msg.encode(enc)?,
            Message::EntryUpdate(msg) => msg.encode(enc)?,
            Message::EntryFlagsUpdate { id, flags } => {
                enc.put_u8(MessageType::EntryFlagsUpdate.code());
                enc.put_u16(*id);
                enc.put_u8(flags.to_byte());
            }
            Message::EntryDelete { id } => {
                enc.put_u8(MessageType::EntryDelete.code());
                enc.put_u16(*id);
            }
            Message::ClearAllEntries => {
                enc.put_u8(MessageType::ClearAllEntries.code());
                enc.put_u32(CLEAR_ALL_MAGIC);
            }
            Message::RpcExecute(call) => call.encode(MessageType::RpcExecute, enc),
            Message::RpcResponse(call) => call.encode(MessageType::RpcResponse, enc),
        }
        Ok(())
    }

    /// Encodes the message into a fresh buffer.
    ///
    /// # Errors
    ///
    /// `InvalidEntryValue` on a declared-type/value mismatch,
    /// `ArrayTooLong` for arrays over 255 elements.
    pub fn encode(&self) -> CodecResult<Bytes> {
        let mut enc = WireEncoder::with_capacity(16);
        self.encode_into(&mut enc)?;
        Ok(enc.into_bytes())
    }

    /// Decodes one message at `offset`.
    ///
    /// Returns the message and the offset of the first unconsumed byte.
    /// A truncated message is a `BufferTooShort` error; use
    /// [`next_message`] to frame a stream.
    pub fn decode(buf: &[u8], offset: usize) -> CodecResult<(Self, usize)> {
        let code = WireDecoder::at(buf, offset).peek_u8()?;
        let kind = MessageType::from_code(code).ok_or(CodecError::UnknownMessageType { found: code })?;
        match kind {
            MessageType::KeepAlive => {
                open(buf, offset, kind).map(|d| (Message::KeepAlive, d.position()))
            }
            MessageType::ServerHelloComplete => {
                open(buf, offset, kind).map(|d| (Message::ServerHelloComplete, d.position()))
            }
            MessageType::ClientHelloComplete => {
                open(buf, offset, kind).map(|d| (Message::ClientHelloComplete, d.position()))
            }
            MessageType::ClientHello => {
                ClientHello::decode(buf, offset).map(|(m, n)| (Message::ClientHello(m), n))
            }
            MessageType::ProtoVersionUnsupported => {
                let mut dec = open(buf, offset, kind)?;
                let major = dec.read_u8()?;
                let minor = dec.read_u8()?;
                Ok((
                    Message::ProtoVersionUnsupported { major, minor },
                    dec.position(),
                ))
            }
            MessageType::ServerHello => {
                ServerHello::decode(buf, offset).map(|(m, n)| (Message::ServerHello(m), n))
            }
            MessageType::EntryAssignment => EntryAssignment::decode(buf, offset)
                .map(|(m, n)| (Message::EntryAssignment(m), n)),
            MessageType::EntryUpdate => {
                EntryUpdate::decode(buf, offset).map(|(m, n)| (Message::EntryUpdate(m), n))
            }
            MessageType::EntryFlagsUpdate => {
                let mut dec = open(buf, offset, kind)?;
                let id = dec.read_u16()?;
                let flags = EntryFlags::from_byte(dec.read_u8()?);
                Ok((Message::EntryFlagsUpdate { id, flags }, dec.position()))
            }
            MessageType::EntryDelete => {
                let mut dec = open(buf, offset, kind)?;
                let id = dec.read_u16()?;
                Ok((Message::EntryDelete { id }, dec.position()))
            }
            MessageType::ClearAllEntries => {
                let mut dec = open(buf, offset, kind)?;
                let magic = dec.read_u32()?;
                if magic != CLEAR_ALL_MAGIC {
                    return Err(CodecError::invalid_entry_value(format!(
                        "bad clear-all magic 0x{magic:08x}"
                    )));
                }
                Ok((Message::ClearAllEntries, dec.position()))
            }
            MessageType::RpcExecute => {
                RpcCall::decode(buf, offset, kind).map(|(m, n)| (Message::RpcExecute(m), n))
            }
            MessageType::RpcResponse => {
                RpcCall::decode(buf, offset, kind).map(|(m, n)| (Message::RpcResponse(m), n))
            }
        }
    }
}

/// Frames the next complete message out of a byte stream.
///
/// - `Ok(Some((message, next_offset)))` for a complete frame.
/// - `Ok(None)` when more bytes are needed.
/// - `Err(_)` when the stream is malformed; the connection cannot be
///   resynchronized and should be dropped.
pub fn next_message(buf: &[u8], offset: usize) -> CodecResult<Option<(Message, usize)>> {
    if offset >= buf.len() {
        return Ok(None);
    }
    match Message::decode(buf, offset) {
        Ok(framed) => Ok(Some(framed)),
        Err(err) if err.is_incomplete() => Ok(None),
        Err(err) => Err(err),
    }
}
