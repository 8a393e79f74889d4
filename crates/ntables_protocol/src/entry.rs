//! Entry types, values, and flags.

use ntables_codec::{CodecError, CodecResult, WireDecoder, WireEncoder};
use serde::Serialize;
use std::fmt;

/// Entry id meaning "not yet assigned by the server".
pub const PENDING_ID: u16 = 0xFFFF;

/// The type of an entry's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// A single boolean.
    Boolean,
    /// A single IEEE-754 double.
    Double,
    /// A UTF-8 string.
    String,
    /// An opaque byte blob.
    Raw,
    /// An array of booleans.
    BooleanArray,
    /// An array of doubles.
    DoubleArray,
    /// An array of strings.
    StringArray,
    /// An RPC definition blob.
    Rpc,
}

impl EntryType {
    /// Returns the wire code for this type.
    pub fn code(self) -> u8 {
        match self {
            EntryType::Boolean => 0x00,
            EntryType::Double => 0x01,
            EntryType::String => 0x02,
            EntryType::Raw => 0x03,
            EntryType::BooleanArray => 0x10,
            EntryType::DoubleArray => 0x11,
            EntryType::StringArray => 0x12,
            EntryType::Rpc => 0x20,
        }
    }

    /// Creates from a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(EntryType::Boolean),
            0x01 => Some(EntryType::Double),
            0x02 => Some(EntryType::String),
            0x03 => Some(EntryType::Raw),
            0x10 => Some(EntryType::BooleanArray),
            0x11 => Some(EntryType::DoubleArray),
            0x12 => Some(EntryType::StringArray),
            0x20 => Some(EntryType::Rpc),
            _ => None,
        }
    }

    /// Decodes a wire code, failing with `InvalidEntryType`.
    pub fn decode(code: u8) -> CodecResult<Self> {
        Self::from_code(code).ok_or(CodecError::InvalidEntryType { found: code })
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            EntryType::Boolean => "boolean",
            EntryType::Double => "double",
            EntryType::String => "string",
            EntryType::Raw => "raw",
            EntryType::BooleanArray => "boolean[]",
            EntryType::DoubleArray => "double[]",
            EntryType::StringArray => "string[]",
            EntryType::Rpc => "rpc",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An entry value. The variant is the entry's type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntryValue {
    /// Boolean value.
    Boolean(bool),
    /// Double value.
    Double(f64),
    /// String value.
    String(String),
    /// Raw bytes.
    Raw(Vec<u8>),
    /// Boolean array.
    BooleanArray(Vec<bool>),
    /// Double array.
    DoubleArray(Vec<f64>),
    /// String array.
    StringArray(Vec<String>),
    /// RPC definition, kept as the undecoded blob.
    Rpc(Vec<u8>),
}

impl EntryValue {
    /// Returns the type of this value.
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryValue::Boolean(_) => EntryType::Boolean,
            EntryValue::Double(_) => EntryType::Double,
            EntryValue::String(_) => EntryType::String,
            EntryValue::Raw(_) => EntryType::Raw,
            EntryValue::BooleanArray(_) => EntryType::BooleanArray,
            EntryValue::DoubleArray(_) => EntryType::DoubleArray,
            EntryValue::StringArray(_) => EntryType::StringArray,
            EntryValue::Rpc(_) => EntryType::Rpc,
        }
    }

    /// Writes the value payload (no type byte).
    ///
    /// # Errors
    ///
    /// `ArrayTooLong` for arrays of more than 255 elements.
    pub fn encode(&self, enc: &mut WireEncoder) -> CodecResult<()> {
        match self {
            EntryValue::Boolean(v) => enc.put_bool(*v),
            EntryValue::Double(v) => enc.put_f64(*v),
            EntryValue::String(v) => enc.put_string(v),
            EntryValue::Raw(v) | EntryValue::Rpc(v) => enc.put_blob(v),
            EntryValue::BooleanArray(items) => {
                enc.put_array_len(items.len())?;
                for item in items {
                    enc.put_bool(*item);
                }
            }
            EntryValue::DoubleArray(items) => {
                enc.put_array_len(items.len())?;
                for item in items {
                    enc.put_f64(*item);
                }
            }
            EntryValue::StringArray(items) => {
                enc.put_array_len(items.len())?;
                for item in items {
                    enc.put_string(item);
                }
            }
        }
        Ok(())
    }

    /// Reads a value payload of type `entry_type`.
    pub fn decode(dec: &mut WireDecoder<'_>, entry_type: EntryType) -> CodecResult<Self> {
        let value = match entry_type {
            EntryType::Boolean => EntryValue::Boolean(dec.read_bool()?),
            EntryType::Double => EntryValue::Double(dec.read_f64()?),
            EntryType::String => EntryValue::String(dec.read_string()?),
            EntryType::Raw => EntryValue::Raw(dec.read_blob()?.to_vec()),
            EntryType::Rpc => EntryValue::Rpc(dec.read_blob()?.to_vec()),
            EntryType::BooleanArray => {
                let count = dec.read_u8()?;
                dec.require(usize::from(count))?;
                let mut items = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    items.push(dec.read_bool()?);
                }
                EntryValue::BooleanArray(items)
            }
            EntryType::DoubleArray => {
                let count = dec.read_u8()?;
                dec.require(usize::from(count) * 8)?;
                let mut items = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    items.push(dec.read_f64()?);
                }
                EntryValue::DoubleArray(items)
            }
            EntryType::StringArray => {
                let count = dec.read_u8()?;
                let mut items = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    items.push(dec.read_string()?);
                }
                EntryValue::StringArray(items)
            }
        };
        Ok(value)
    }
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Boolean(v) => write!(f, "{v}"),
            EntryValue::Double(v) => write!(f, "{v}"),
            EntryValue::String(v) => write!(f, "{v:?}"),
            EntryValue::Raw(v) => write!(f, "<{} raw bytes>", v.len()),
            EntryValue::Rpc(v) => write!(f, "<rpc, {} bytes>", v.len()),
            EntryValue::BooleanArray(v) => write!(f, "{v:?}"),
            EntryValue::DoubleArray(v) => write!(f, "{v:?}"),
            EntryValue::StringArray(v) => write!(f, "{v:?}"),
        }
    }
}

/// Per-entry flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct EntryFlags {
    /// Whether the entry should survive a server restart.
    pub persistent: bool,
}

impl EntryFlags {
    const PERSISTENT: u8 = 0x01;

    /// Flags with `persistent` set.
    pub fn persistent() -> Self {
        Self { persistent: true }
    }

    /// Wire representation.
    pub fn to_byte(self) -> u8 {
        if self.persistent {
            Self::PERSISTENT
        } else {
            0
        }
    }

    /// Parses the wire representation. Unknown bits are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            persistent: byte & Self::PERSISTENT != 0,
        }
    }
}

/// A named, typed value synchronized between participants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// Unique key.
    pub name: String,
    /// Server-assigned id, or [`PENDING_ID`].
    pub id: u16,
    /// Current value.
    pub value: EntryValue,
    /// Sequence number used for last-writer arbitration.
    pub seq: u16,
    /// Flags.
    pub flags: EntryFlags,
}

impl Entry {
    /// Creates an entry with default flags.
    pub fn new(name: impl Into<String>, id: u16, seq: u16, value: EntryValue) -> Self {
        Self {
            name: name.into(),
            id,
            value,
            seq,
            flags: EntryFlags::default(),
        }
    }

    /// Creates a client-local entry the server has not assigned yet.
    pub fn pending(name: impl Into<String>, value: EntryValue) -> Self {
        Self::new(name, PENDING_ID, 0, value)
    }

    /// Returns the entry type, derived from its value.
    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }

    /// Returns true if the server has not assigned an id yet.
    pub fn is_pending(&self) -> bool {
        self.id == PENDING_ID
    }

    /// Returns true if an update carrying `seq` should replace this entry's value.
    ///
    /// Comparison is plain unsigned: an update whose sequence number is not
    /// strictly greater is stale. There is no wraparound window, so once a
    /// writer's counter wraps from `0xFFFF` to 0 its updates are rejected
    /// until the entry is reassigned.
    pub fn accepts_seq(&self, seq: u16) -> bool {
        seq > self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: EntryValue) {
        let mut enc = WireEncoder::new();
        value.encode(&mut enc).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = WireDecoder::new(&bytes);
        let decoded = EntryValue::decode(&mut dec, value.entry_type()).unwrap();
        assert_eq!(decoded, value);
        assert!(dec.is_empty());
    }

    #[test]
    fn type_codes_roundtrip() {
        for ty in [
            EntryType::Boolean,
            EntryType::Double,
            EntryType::String,
            EntryType::Raw,
            EntryType::BooleanArray,
            EntryType::DoubleArray,
            EntryType::StringArray,
            EntryType::Rpc,
        ] {
            assert_eq!(EntryType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(EntryType::from_code(0x04), None);
        assert_eq!(
            EntryType::decode(0x30),
            Err(CodecError::InvalidEntryType { found: 0x30 })
        );
    }

    #[test]
    fn value_payloads() {
        roundtrip(EntryValue::Boolean(true));
        roundtrip(EntryValue::Double(-2.5));
        roundtrip(EntryValue::String(String::new()));
        roundtrip(EntryValue::Raw(vec![1, 2, 3]));
        roundtrip(EntryValue::BooleanArray(vec![]));
        roundtrip(EntryValue::DoubleArray(vec![1.0, 2.0]));
        roundtrip(EntryValue::StringArray(vec!["a".into(), String::new()]));
        roundtrip(EntryValue::Rpc(vec![0x01, 0x00]));
    }

    #[test]
    fn boolean_array_layout() {
        let mut enc = WireEncoder::new();
        EntryValue::BooleanArray(vec![true, false, true])
            .encode(&mut enc)
            .unwrap();
        assert_eq!(enc.as_bytes(), &[3, 1, 0, 1]);
    }

    #[test]
    fn oversized_array_rejected() {
        let mut enc = WireEncoder::new();
        let err = EntryValue::DoubleArray(vec![0.0; 256])
            .encode(&mut enc)
            .unwrap_err();
        assert_eq!(err, CodecError::ArrayTooLong { len: 256 });
    }

    #[test]
    fn truncated_array_is_incomplete() {
        let mut dec = WireDecoder::new(&[4, 0, 0]);
        let err = EntryValue::decode(&mut dec, EntryType::DoubleArray).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn flags_byte() {
        assert_eq!(EntryFlags::default().to_byte(), 0);
        assert_eq!(EntryFlags::persistent().to_byte(), 1);
        assert!(EntryFlags::from_byte(0xff).persistent);
        assert!(!EntryFlags::from_byte(0xfe).persistent);
    }

    #[test]
    fn pending_entry() {
        let entry = Entry::pending("/a", EntryValue::Double(1.0));
        assert!(entry.is_pending());
        assert_eq!(entry.seq, 0);
        assert_eq!(entry.entry_type(), EntryType::Double);
        assert!(!entry.flags.persistent);
    }

    #[test]
    fn sequence_arbitration() {
        let entry = Entry::new("/a", 1, 5, EntryValue::Boolean(true));
        assert!(!entry.accepts_seq(4));
        assert!(!entry.accepts_seq(5));
        assert!(entry.accepts_seq(6));

        let at_max = Entry::new("/a", 1, u16::MAX, EntryValue::Boolean(true));
        assert!(!at_max.accepts_seq(u16::MAX.wrapping_add(1)));
    }

    #[test]
    fn value_json_shape() {
        let json = serde_json::to_string(&EntryValue::Double(1.5)).unwrap();
        assert_eq!(json, r#"{"type":"double","value":1.5}"#);
    }
}
