//! Pluggable wire framing.
//!
//! A [`Protocol`] turns the raw byte stream of a connection into messages and
//! back. The engine itself never looks inside a frame: it reads `head_len()`
//! bytes, asks the protocol how long the body is, reads that many bytes, and
//! hands both to `parse`. A protocol with `head_len() == 0` puts the
//! connection in unframed mode, where every socket read is delivered as-is.

use bytes::Bytes;
use thiserror::Error;

use crate::net::connection::Connection;

/// Errors raised by a protocol while decoding or encoding.
///
/// Decode errors surface as `ProtoError` events and leave the connection open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The header bytes could not be decoded.
    #[error("invalid header: {0}")]
    Header(String),

    /// The body could not be parsed into a message.
    #[error("invalid body: {0}")]
    Body(String),

    /// An outbound message could not be encoded.
    #[error("serialize failed: {0}")]
    Serialize(String),
}

/// Framing, parsing and serialization contract bound to a listener or connection.
pub trait Protocol: Send + Sync + Sized + 'static {
    /// Decoded header handed from `body_len` to `parse`.
    type Header: Send;

    /// Application-visible message type.
    type Message: Send + Sync + 'static;

    /// Called on each accepted connection before it is registered.
    ///
    /// Returning `false` drops the connection: no event, no tasks, socket closed.
    fn filter_accept(&self, _conn: &Connection<Self>) -> bool {
        true
    }

    /// Fixed header size in bytes; `0` selects unframed mode.
    fn head_len(&self) -> usize;

    /// Decode a header and report the length of the body that follows.
    fn body_len(&self, head: &[u8]) -> Result<(Self::Header, usize), ProtocolError>;

    /// Combine a decoded header and its body into a message.
    fn parse(&self, head: Self::Header, body: Bytes) -> Result<Self::Message, ProtocolError>;

    /// Encode an outbound message into wire-ready bytes.
    fn serialize(&self, message: &Self::Message) -> Result<Bytes, ProtocolError>;
}

/// Raw passthrough protocol: no header, messages are the bytes themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unframed;

impl Protocol for Unframed {
    type Header = ();
    type Message = Bytes;

    fn head_len(&self) -> usize {
        0
    }

    fn body_len(&self, _head: &[u8]) -> Result<((), usize), ProtocolError> {
        Ok(((), 0))
    }

    fn parse(&self, _head: (), body: Bytes) -> Result<Bytes, ProtocolError> {
        Ok(body)
    }

    fn serialize(&self, message: &Bytes) -> Result<Bytes, ProtocolError> {
        Ok(message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unframed_is_raw_mode() {
        let proto = Unframed;
        assert_eq!(proto.head_len(), 0);

        let msg = Bytes::from_static(b"ping");
        let wire = proto.serialize(&msg).unwrap();
        assert_eq!(wire, msg);
        assert_eq!(proto.parse((), wire).unwrap(), msg);
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::Header("length 0".into());
        assert_eq!(err.to_string(), "invalid header: length 0");
    }
}
