//! Per-connection bookkeeping: identity, handshake progress and framing.

use bytes::{Buf, BytesMut};
use ntables_codec::CodecError;
use ntables_protocol::{next_message, Message};
use std::fmt;

/// Identifies one accepted TCP connection for the lifetime of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a connection is in the server side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHandshakeState {
    /// Accepted; nothing is sent until `CLIENT_HELLO` arrives.
    AwaitClientHello,
    /// Snapshot sent; the client is announcing its own entries.
    AwaitClientHelloComplete,
    /// Steady state.
    Complete,
}

/// Accumulates bytes from a stream and cuts them into messages.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    /// Creates an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet part of a complete message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends `bytes` and returns every message now complete.
    ///
    /// Messages that precede a malformed frame are still returned, in
    /// order, alongside the error. The stream cannot be resynchronised
    /// after an error and should be closed once they are applied.
    pub fn push(&mut self, bytes: &[u8]) -> Frames {
        self.buf.extend_from_slice(bytes);
        let mut frames = Frames::default();
        let mut offset = 0;
        loop {
            match next_message(&self.buf, offset) {
                Ok(Some((message, next))) => {
                    frames.messages.push(message);
                    offset = next;
                }
                Ok(None) => break,
                Err(err) => {
                    frames.error = Some(err);
                    break;
                }
            }
        }
        self.buf.advance(offset);
        frames
    }
}

/// The outcome of one [`FrameReader::push`].
#[derive(Debug, Default)]
pub struct Frames {
    /// Complete messages, in stream order.
    pub messages: Vec<Message>,
    /// Set when the stream turned out malformed after `messages`.
    pub error: Option<CodecError>,
}

impl Frames {
    /// Returns the messages, or the error if the stream broke.
    ///
    /// Discards the leading messages on error; use the fields directly to
    /// keep them.
    pub fn into_result(self) -> Result<Vec<Message>, CodecError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.messages),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntables_core::{EntryFlags, EntryValue, PENDING_ID};
    use ntables_protocol::{ClientHello, EntryAssignment};

    fn wire(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .flat_map(|m| m.encode().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn display() {
        assert_eq!(ConnectionId(7).to_string(), "#7");
    }

    #[test]
    fn frames_split_across_reads() {
        let hello = Message::ClientHello(ClientHello {
            major: 3,
            minor: 0,
            identity: "robot".into(),
        });
        let assignment = Message::EntryAssignment(EntryAssignment::new(
            "/x",
            PENDING_ID,
            0,
            EntryFlags::default(),
            EntryValue::String("hello".into()),
        ));
        let bytes = wire(&[hello.clone(), assignment.clone(), Message::KeepAlive]);

        let mut reader = FrameReader::new();
        let split = 5;
        assert!(reader.push(&bytes[..split]).into_result().unwrap().is_empty());
        assert_eq!(reader.buffered(), split);

        let messages = reader.push(&bytes[split..]).into_result().unwrap();
        assert_eq!(messages, vec![hello, assignment, Message::KeepAlive]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time() {
        let bytes = wire(&[Message::ClientHelloComplete, Message::EntryDelete { id: 3 }]);
        let mut reader = FrameReader::new();
        let mut got = Vec::new();
        for byte in bytes {
            got.extend(reader.push(&[byte]).into_result().unwrap());
        }
        assert_eq!(got, vec![Message::ClientHelloComplete, Message::EntryDelete { id: 3 }]);
    }

    #[test]
    fn malformed_stream_is_an_error() {
        let mut reader = FrameReader::new();
        assert!(reader.push(&[0x00, 0x7F, 0x00]).into_result().is_err());
    }

    #[test]
    fn frames_before_a_malformed_one_are_kept() {
        let mut bytes = wire(&[Message::EntryDelete { id: 3 }, Message::KeepAlive]);
        bytes.push(0x7F);

        let frames = FrameReader::new().push(&bytes);
        assert_eq!(
            frames.messages,
            vec![Message::EntryDelete { id: 3 }, Message::KeepAlive]
        );
        assert!(matches!(
            frames.error,
            Some(CodecError::UnknownMessageType { found: 0x7F })
        ));
    }
}
