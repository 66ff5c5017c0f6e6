//! Error types for engine operations.

use thiserror::Error;

use crate::net::protocol::ProtocolError;

/// Errors returned synchronously by [`Engine`](crate::net::Engine) operations.
///
/// Socket failures on established connections never show up here; they are
/// reported as `ConnectionError` / `ConnectionClosed` events instead.
#[derive(Debug, Error)]
pub enum NetError {
    /// Failed to bind a listening socket.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to dial a remote peer.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection is not in the `Connected` state.
    #[error("not connected connection")]
    NotConnected,

    /// A structured message was sent on a connection without a protocol, or
    /// raw bytes on one with a protocol.
    #[error("unexpected payload type for connection framing")]
    TypeMismatch,

    /// The bound protocol failed to serialize the outbound message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The outbound mailbox was closed while enqueueing.
    #[error("connection mailbox closed")]
    MailboxClosed,

    /// The engine has been destroyed.
    #[error("engine destroyed")]
    Destroyed,

    /// `destroy` was called more than once.
    #[error("engine already destroyed")]
    AlreadyDestroyed,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, NetError>;
