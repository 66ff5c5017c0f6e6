//! Established TCP sessions and their I/O tasks.
//!
//! # Responsibilities
//! - Hold per-connection state (status, addresses, mailbox, activity time)
//! - Run one read task and one write task per connection
//! - Funnel I/O failures from either task through a single teardown path
//!
//! # Lifecycle
//! ```text
//! Connected ──(close_conn | I/O error | destroy)──▶ Broken
//! ```
//! The transition is a compare-exchange on a shared atomic. Whichever caller
//! wins it closes the mailbox, signals the socket halves to drop, and removes
//! the connection from its registry. Everyone else sees `Broken` and backs off.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::net::engine::Shared;
use crate::net::event::{Event, Payload};
use crate::net::listener::ListenerId;
use crate::net::protocol::{Protocol, ProtocolError};
use crate::net::slot::UserData;
use crate::net::task::spawn_supervised;
use crate::observability::metrics;

/// Unique identifier for a connection within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection status.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected = 1,
    Broken = 2,
}

impl From<u8> for ConnectionStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => ConnectionStatus::Connected,
            _ => ConnectionStatus::Broken,
        }
    }
}

/// One established TCP session.
pub struct Connection<P: Protocol> {
    id: ConnectionId,
    /// Owning listener for accepted connections; a lookup key, not a handle.
    listener_id: Option<ListenerId>,
    status: AtomicU8,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    last_activity: Mutex<Instant>,
    protocol: Option<Arc<P>>,
    /// Taken (and thereby closed) on teardown.
    mailbox: Mutex<Option<mpsc::Sender<Bytes>>>,
    /// Flipped to `true` on teardown; both I/O tasks exit when they see it.
    closed: watch::Sender<bool>,
    user_data: UserData,
}

impl<P: Protocol> Connection<P> {
    /// Build a `Connected` connection and the receiving end of its mailbox.
    pub(crate) fn new(
        id: ConnectionId,
        listener_id: Option<ListenerId>,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        protocol: Option<Arc<P>>,
        mailbox_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let (closed, _) = watch::channel(false);
        let conn = Arc::new(Self {
            id,
            listener_id,
            status: AtomicU8::new(ConnectionStatus::Connected as u8),
            local_addr,
            remote_addr,
            last_activity: Mutex::new(Instant::now()),
            protocol,
            mailbox: Mutex::new(Some(tx)),
            closed,
            user_data: UserData::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Time of the last completed read cycle or write.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The listener that accepted this connection; `None` for client connections.
    pub fn listener_id(&self) -> Option<ListenerId> {
        self.listener_id
    }

    pub fn protocol(&self) -> Option<&Arc<P>> {
        self.protocol.as_ref()
    }

    pub fn user_data(&self) -> &UserData {
        &self.user_data
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub(crate) fn mailbox(&self) -> Option<mpsc::Sender<Bytes>> {
        self.mailbox.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Connected → Broken. Returns `true` for the single caller that wins.
    pub(crate) fn mark_broken(&self) -> bool {
        self.status
            .compare_exchange(
                ConnectionStatus::Connected as u8,
                ConnectionStatus::Broken as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Close the mailbox and tell both I/O tasks to drop their socket halves.
    pub(crate) fn shut(&self) {
        self.mailbox.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.closed.send_replace(true);
    }
}

impl<P: Protocol> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("listener_id", &self.listener_id)
            .field("framed", &self.protocol.is_some())
            .finish()
    }
}

/// How an I/O task ended.
#[derive(Debug)]
pub(crate) enum Disconnect {
    /// Peer closed the stream at a frame boundary.
    Eof,
    Io(io::Error),
}

/// Split the socket and start the read and write tasks.
pub(crate) fn spawn_io<P: Protocol>(
    shared: &Arc<Shared<P>>,
    conn: Arc<Connection<P>>,
    stream: TcpStream,
    mailbox: mpsc::Receiver<Bytes>,
) {
    let (reader, writer) = stream.into_split();
    let owner = conn.id().as_u64();

    spawn_supervised(
        "read",
        owner,
        read_task(Arc::clone(shared), Arc::clone(&conn), reader),
    );
    spawn_supervised("write", owner, write_task(Arc::clone(shared), conn, writer, mailbox));
}

async fn read_task<P: Protocol>(shared: Arc<Shared<P>>, conn: Arc<Connection<P>>, mut reader: OwnedReadHalf) {
    let mut closed = conn.closed.subscribe();
    let cause = tokio::select! {
        cause = read_loop(&shared, &conn, &mut reader) => cause,
        _ = closed.wait_for(|c| *c) => {
            tracing::trace!(connection_id = %conn.id(), "Read task stopped");
            return;
        }
    };
    handle_disconnect(&shared, &conn, cause, "read").await;
}

async fn read_loop<P: Protocol>(
    shared: &Shared<P>,
    conn: &Arc<Connection<P>>,
    reader: &mut OwnedReadHalf,
) -> Disconnect {
    match conn.protocol() {
        Some(proto) if proto.head_len() > 0 => read_framed(shared, conn, proto, reader).await,
        _ => read_unframed(shared, conn, reader).await,
    }
}

/// Deliver every completed read as one raw data event.
async fn read_unframed<P: Protocol>(
    shared: &Shared<P>,
    conn: &Arc<Connection<P>>,
    reader: &mut OwnedReadHalf,
) -> Disconnect {
    let mut buf = vec![0u8; shared.config().read_buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Disconnect::Eof,
            Ok(n) => n,
            Err(e) => return Disconnect::Io(e),
        };
        metrics::record_bytes_read(n);
        tracing::trace!(connection_id = %conn.id(), bytes = n, remote_addr = %conn.remote_addr(), "Read data");

        let data = Bytes::copy_from_slice(&buf[..n]);
        shared
            .emit(Event::NewConnectionData(Arc::clone(conn), Payload::Raw(data)))
            .await;
        conn.touch();
    }
}

/// Read header, then body, then hand both to the protocol.
///
/// Decode failures become `ProtoError` events and the loop keeps going.
async fn read_framed<P: Protocol>(
    shared: &Shared<P>,
    conn: &Arc<Connection<P>>,
    proto: &Arc<P>,
    reader: &mut OwnedReadHalf,
) -> Disconnect {
    let max_frame_len = shared.config().max_frame_len;
    loop {
        let head_len = proto.head_len();
        let mut head = vec![0u8; head_len];
        match read_full(reader, &mut head).await {
            Ok(0) => return Disconnect::Eof,
            Ok(n) if n < head_len => return Disconnect::Io(truncated("header", n, head_len)),
            Ok(_) => {}
            Err(e) => return Disconnect::Io(e),
        }

        let (header, body_len) = match proto.body_len(&head) {
            Ok(decoded) => decoded,
            Err(e) => {
                proto_error(shared, conn, e).await;
                continue;
            }
        };
        if body_len > max_frame_len {
            let e = ProtocolError::Header(format!(
                "body length {} exceeds limit {}",
                body_len, max_frame_len
            ));
            proto_error(shared, conn, e).await;
            continue;
        }

        let mut body = BytesMut::zeroed(body_len);
        match read_full(reader, &mut body).await {
            Ok(n) if n < body_len => return Disconnect::Io(truncated("body", n, body_len)),
            Ok(_) => {}
            Err(e) => return Disconnect::Io(e),
        }
        metrics::record_bytes_read(head_len + body_len);
        tracing::trace!(
            connection_id = %conn.id(),
            bytes = head_len + body_len,
            remote_addr = %conn.remote_addr(),
            "Read frame"
        );

        match proto.parse(header, body.freeze()) {
            Ok(message) => {
                shared
                    .emit(Event::NewConnectionData(Arc::clone(conn), Payload::Message(message)))
                    .await;
            }
            Err(e) => {
                proto_error(shared, conn, e).await;
                continue;
            }
        }
        conn.touch();
    }
}

async fn proto_error<P: Protocol>(shared: &Shared<P>, conn: &Arc<Connection<P>>, error: ProtocolError) {
    tracing::debug!(connection_id = %conn.id(), error = %error, "Protocol error");
    shared.emit(Event::ProtoError(Arc::clone(conn), error)).await;
}

/// Read until `buf` is full or the stream ends. Returns the number of bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn truncated(part: &str, got: usize, want: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("stream ended inside frame {}: read {} of {} bytes", part, got, want),
    )
}

async fn write_task<P: Protocol>(
    shared: Arc<Shared<P>>,
    conn: Arc<Connection<P>>,
    mut writer: OwnedWriteHalf,
    mut mailbox: mpsc::Receiver<Bytes>,
) {
    let mut closed = conn.closed.subscribe();
    loop {
        let frame = tokio::select! {
            frame = mailbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = closed.wait_for(|c| *c) => break,
        };

        let written = tokio::select! {
            res = writer.write_all(&frame) => res,
            _ = closed.wait_for(|c| *c) => break,
        };
        if let Err(e) = written {
            handle_disconnect(&shared, &conn, Disconnect::Io(e), "write").await;
            return;
        }

        conn.touch();
        metrics::record_bytes_written(frame.len());
        tracing::trace!(connection_id = %conn.id(), bytes = frame.len(), remote_addr = %conn.remote_addr(), "Sent data");
    }
    tracing::trace!(connection_id = %conn.id(), "Write task stopped");
}

/// Shared terminal-error path for both I/O tasks.
///
/// Nothing is emitted once the engine is destroyed. Otherwise the task that
/// wins the Connected → Broken transition tears the connection down and emits
/// the one terminal event; the other task exits quietly.
pub(crate) async fn handle_disconnect<P: Protocol>(
    shared: &Shared<P>,
    conn: &Arc<Connection<P>>,
    cause: Disconnect,
    task: &'static str,
) {
    if shared.is_destroyed() {
        tracing::debug!(connection_id = %conn.id(), task, "Engine destroyed, dropping connection error");
        return;
    }
    if !shared.teardown(conn) {
        tracing::trace!(connection_id = %conn.id(), task, cause = ?cause, "Connection already broken");
        return;
    }

    let event = match cause {
        Disconnect::Eof => {
            tracing::debug!(connection_id = %conn.id(), task, remote_addr = %conn.remote_addr(), "Connection closed by peer");
            Event::ConnectionClosed(Arc::clone(conn))
        }
        Disconnect::Io(e) => {
            tracing::debug!(connection_id = %conn.id(), task, error = %e, "Connection error");
            Event::ConnectionError(Arc::clone(conn), e)
        }
    };
    shared.emit(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Unframed;

    fn conn() -> (Arc<Connection<Unframed>>, mpsc::Receiver<Bytes>) {
        let local: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let remote: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        Connection::new(ConnectionId::new(1), None, local, remote, None, 4)
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(9).to_string(), "conn-9");
    }

    #[test]
    fn status_from_u8() {
        assert_eq!(ConnectionStatus::from(1), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from(2), ConnectionStatus::Broken);
        assert_eq!(ConnectionStatus::from(0), ConnectionStatus::Broken);
    }

    #[test]
    fn only_one_caller_breaks() {
        let (conn, _rx) = conn();
        assert!(conn.is_connected());
        assert!(conn.mark_broken());
        assert!(!conn.mark_broken());
        assert_eq!(conn.status(), ConnectionStatus::Broken);
    }

    #[tokio::test]
    async fn shut_closes_mailbox() {
        let (conn, mut rx) = conn();
        assert!(conn.mailbox().is_some());

        conn.shut();
        assert!(conn.mailbox().is_none());
        assert!(rx.recv().await.is_none());
        assert!(*conn.closed.subscribe().borrow());
    }

    #[tokio::test]
    async fn read_full_reports_short_reads() {
        let mut data: &[u8] = b"abc";
        let mut buf = [0u8; 5];
        let n = read_full(&mut data, &mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"abc");

        let mut empty: &[u8] = b"";
        assert_eq!(read_full(&mut empty, &mut buf).await.unwrap(), 0);
    }
}
