//! Events delivered through [`Engine::poll_event`](crate::net::Engine::poll_event).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::net::connection::Connection;
use crate::net::protocol::{Protocol, ProtocolError};

/// Discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewConnection,
    ConnectionError,
    ConnectionClosed,
    NewConnectionData,
    ProtoError,
    Timeout,
}

impl EventKind {
    /// Stable lowercase name, used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewConnection => "new_connection",
            EventKind::ConnectionError => "connection_error",
            EventKind::ConnectionClosed => "connection_closed",
            EventKind::NewConnectionData => "new_connection_data",
            EventKind::ProtoError => "proto_error",
            EventKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application data: raw bytes in unframed mode, a parsed message otherwise.
///
/// Also the input of [`Engine::send_data`](crate::net::Engine::send_data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<M> {
    Raw(Bytes),
    Message(M),
}

impl<M> Payload<M> {
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(b) => Some(b),
            Payload::Message(_) => None,
        }
    }

    pub fn as_message(&self) -> Option<&M> {
        match self {
            Payload::Message(m) => Some(m),
            Payload::Raw(_) => None,
        }
    }

    pub fn into_message(self) -> Option<M> {
        match self {
            Payload::Message(m) => Some(m),
            Payload::Raw(_) => None,
        }
    }
}

impl<M> From<Bytes> for Payload<M> {
    fn from(bytes: Bytes) -> Self {
        Payload::Raw(bytes)
    }
}

impl<M> From<&'static [u8]> for Payload<M> {
    fn from(bytes: &'static [u8]) -> Self {
        Payload::Raw(Bytes::from_static(bytes))
    }
}

impl<M> From<Vec<u8>> for Payload<M> {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(Bytes::from(bytes))
    }
}

/// Something that happened on the engine.
///
/// Every variant except `Timeout` refers to the connection it concerns.
/// `Timeout` is synthesized by `poll_event` and never queued.
pub enum Event<P: Protocol> {
    /// A listener accepted a connection.
    NewConnection(Arc<Connection<P>>),
    /// The connection failed with an I/O error and has been torn down.
    ConnectionError(Arc<Connection<P>>, std::io::Error),
    /// The peer closed the stream cleanly; the connection has been torn down.
    ConnectionClosed(Arc<Connection<P>>),
    /// Data arrived on the connection.
    NewConnectionData(Arc<Connection<P>>, Payload<P::Message>),
    /// The protocol rejected a frame; the connection stays open.
    ProtoError(Arc<Connection<P>>, ProtocolError),
    /// Nothing happened within the poll timeout.
    Timeout,
}

impl<P: Protocol> Event<P> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewConnection(_) => EventKind::NewConnection,
            Event::ConnectionError(..) => EventKind::ConnectionError,
            Event::ConnectionClosed(_) => EventKind::ConnectionClosed,
            Event::NewConnectionData(..) => EventKind::NewConnectionData,
            Event::ProtoError(..) => EventKind::ProtoError,
            Event::Timeout => EventKind::Timeout,
        }
    }

    pub fn connection(&self) -> Option<&Arc<Connection<P>>> {
        match self {
            Event::NewConnection(c)
            | Event::ConnectionError(c, _)
            | Event::ConnectionClosed(c)
            | Event::NewConnectionData(c, _)
            | Event::ProtoError(c, _) => Some(c),
            Event::Timeout => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Event::Timeout)
    }
}

impl<P: Protocol> fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Event");
        s.field("kind", &self.kind());
        if let Some(conn) = self.connection() {
            s.field("connection", &conn.id());
        }
        match self {
            Event::ConnectionError(_, e) => {
                s.field("error", e);
            }
            Event::ProtoError(_, e) => {
                s.field("error", e);
            }
            Event::NewConnectionData(_, Payload::Raw(b)) => {
                s.field("bytes", &b.len());
            }
            _ => {}
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Unframed;

    #[test]
    fn timeout_has_no_connection() {
        let event: Event<Unframed> = Event::Timeout;
        assert_eq!(event.kind(), EventKind::Timeout);
        assert!(event.connection().is_none());
        assert!(event.is_timeout());
    }

    #[test]
    fn payload_accessors() {
        let raw: Payload<String> = Payload::from(&b"ping"[..]);
        assert_eq!(raw.as_raw().map(|b| &b[..]), Some(&b"ping"[..]));
        assert!(raw.as_message().is_none());

        let msg: Payload<String> = Payload::Message("hello".into());
        assert_eq!(msg.as_message().map(String::as_str), Some("hello"));
        assert_eq!(msg.into_message().as_deref(), Some("hello"));
    }

    #[test]
    fn kind_labels() {
        assert_eq!(EventKind::NewConnectionData.as_str(), "new_connection_data");
        assert_eq!(EventKind::ProtoError.to_string(), "proto_error");
    }
}
