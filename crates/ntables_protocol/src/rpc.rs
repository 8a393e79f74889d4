//! RPC definition blobs.
//!
//! An RPC entry's value is an opaque blob on the wire. Version 1 of its
//! contents describes the procedure:
//!
//! ```text
//! u8      version (0x01)
//! string  name
//! u8      parameter count
//!   u8      parameter type
//!   string  parameter name
//!   value   default value, encoded as the parameter type
//! u8      result count
//!   u8      result type
//!   string  result name
//! ```
//!
//! Definitions are parsed so a server can index them. Nothing here
//! executes a call.

use crate::entry::{EntryType, EntryValue};
use bytes::Bytes;
use ntables_codec::{CodecError, CodecResult, WireDecoder, WireEncoder};

/// The only definition layout this crate understands.
pub const RPC_DEFINITION_VERSION: u8 = 0x01;

/// A named, typed RPC parameter with its default value.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParameter {
    /// Parameter name.
    pub name: String,
    /// Default value; its variant is the parameter type.
    pub default: EntryValue,
}

/// A named, typed RPC result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResult {
    /// Result type.
    pub entry_type: EntryType,
    /// Result name.
    pub name: String,
}

/// A parsed RPC definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcDefinition {
    /// Procedure name.
    pub name: String,
    /// Parameters in call order.
    pub parameters: Vec<RpcParameter>,
    /// Results in return order.
    pub results: Vec<RpcResult>,
}

impl RpcDefinition {
    /// Parses a definition blob.
    ///
    /// # Errors
    ///
    /// `InvalidEntryValue` for an unknown version, trailing bytes, or a
    /// truncated blob. Embedded type bytes fail with `InvalidEntryType`.
    pub fn parse(blob: &[u8]) -> CodecResult<Self> {
        let mut dec = WireDecoder::new(blob);
        Self::read(&mut dec).map_err(|err| {
            if err.is_incomplete() {
                CodecError::invalid_entry_value("truncated rpc definition")
            } else {
                err
            }
        })
    }

    fn read(dec: &mut WireDecoder<'_>) -> CodecResult<Self> {
        let version = dec.read_u8()?;
        if version != RPC_DEFINITION_VERSION {
            return Err(CodecError::invalid_entry_value(format!(
                "unsupported rpc definition version {version}"
            )));
        }
        let name = dec.read_string()?;

        let param_count = dec.read_u8()?;
        let mut parameters = Vec::with_capacity(usize::from(param_count));
        for _ in 0..param_count {
            let entry_type = EntryType::decode(dec.read_u8()?)?;
            let name = dec.read_string()?;
            let default = EntryValue::decode(dec, entry_type)?;
            parameters.push(RpcParameter { name, default });
        }

        let result_count = dec.read_u8()?;
        let mut results = Vec::with_capacity(usize::from(result_count));
        for _ in 0..result_count {
            let entry_type = EntryType::decode(dec.read_u8()?)?;
            let name = dec.read_string()?;
            results.push(RpcResult { entry_type, name });
        }

        if !dec.is_empty() {
            return Err(CodecError::invalid_entry_value(format!(
                "{} trailing bytes after rpc definition",
                dec.remaining().len()
            )));
        }

        Ok(Self {
            name,
            parameters,
            results,
        })
    }

    /// Encodes the definition blob.
    ///
    /// # Errors
    ///
    /// `ArrayTooLong` if there are more than 255 parameters or results.
    pub fn encode(&self) -> CodecResult<Bytes> {
        let mut enc = WireEncoder::new();
        enc.put_u8(RPC_DEFINITION_VERSION);
        enc.put_string(&self.name);
        enc.put_array_len(self.parameters.len())?;
        for param in &self.parameters {
            enc.put_u8(param.default.entry_type().code());
            enc.put_string(&param.name);
            param.default.encode(&mut enc)?;
        }
        enc.put_array_len(self.results.len())?;
        for result in &self.results {
            enc.put_u8(result.entry_type.code());
            enc.put_string(&result.name);
        }
        Ok(enc.into_bytes())
    }

    /// Wraps the encoded definition as an entry value.
    pub fn to_value(&self) -> CodecResult<EntryValue> {
        Ok(EntryValue::Rpc(self.encode()?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RpcDefinition {
        RpcDefinition {
            name: "My RPC".into(),
            parameters: vec![
                RpcParameter {
                    name: "Param1".into(),
                    default: EntryValue::Boolean(false),
                },
                RpcParameter {
                    name: "Param2".into(),
                    default: EntryValue::String("FooBar".into()),
                },
            ],
            results: vec![RpcResult {
                entry_type: EntryType::Double,
                name: "Result1".into(),
            }],
        }
    }

    #[test]
    fn definition_roundtrip() {
        let def = sample();
        let blob = def.encode().unwrap();
        assert_eq!(RpcDefinition::parse(&blob).unwrap(), def);
    }

    #[test]
    fn definition_layout_prefix() {
        let blob = sample().encode().unwrap();
        assert_eq!(blob[0], RPC_DEFINITION_VERSION);
        assert_eq!(&blob[1..8], b"\x06My RPC");
        assert_eq!(blob[8], 2);
    }

    #[test]
    fn empty_definition() {
        let def = RpcDefinition {
            name: String::new(),
            parameters: vec![],
            results: vec![],
        };
        let blob = def.encode().unwrap();
        assert_eq!(blob.as_ref(), &[0x01, 0, 0, 0]);
        assert_eq!(RpcDefinition::parse(&blob).unwrap(), def);
    }

    #[test]
    fn unknown_version_rejected() {
        let err = RpcDefinition::parse(&[0x02, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidEntryValue { .. }));
    }

    #[test]
    fn truncated_definition_is_invalid_not_incomplete() {
        let blob = sample().encode().unwrap();
        let err = RpcDefinition::parse(&blob[..blob.len() - 1]).unwrap_err();
        assert!(!err.is_incomplete());
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert!(RpcDefinition::parse(&[0x01, 0, 0, 0, 0xAA]).is_err());
    }

    #[test]
    fn carried_as_entry_value() {
        let value = sample().to_value().unwrap();
        assert_eq!(value.entry_type(), EntryType::Rpc);
        let EntryValue::Rpc(blob) = value else {
            panic!("expected rpc value");
        };
        assert_eq!(RpcDefinition::parse(&blob).unwrap(), sample());
    }
}
