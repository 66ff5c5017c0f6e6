//! TCP listeners and their accept loops.
//!
//! # Responsibilities
//! - Own a bound server socket and the registry of connections it accepted
//! - Accept incoming TCP connections until closed
//! - Apply the protocol's accept filter before anything is registered
//! - Retry after transient accept errors

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::net::connection::{spawn_io, Connection, ConnectionId};
use crate::net::engine::Shared;
use crate::net::event::Event;
use crate::net::protocol::Protocol;
use crate::net::registry::Registry;
use crate::net::slot::UserData;
use crate::net::task::spawn_supervised;
use crate::observability::metrics;

/// Unique identifier for a listener within one engine.
///
/// Listener and connection ids come from the same counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Listener status.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Listening = 1,
    Broken = 2,
}

impl From<u8> for ListenerStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => ListenerStatus::Listening,
            _ => ListenerStatus::Broken,
        }
    }
}

/// A bound server socket plus the connections it has accepted.
pub struct Listener<P: Protocol> {
    id: ListenerId,
    status: AtomicU8,
    local_addr: SocketAddr,
    pub(crate) connections: Registry<ConnectionId, Connection<P>>,
    protocol: Option<Arc<P>>,
    /// Flipped to `true` on close; the accept loop drops the socket when it sees it.
    closed: watch::Sender<bool>,
    user_data: UserData,
}

impl<P: Protocol> Listener<P> {
    pub(crate) fn new(id: ListenerId, local_addr: SocketAddr, protocol: Option<Arc<P>>) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id,
            status: AtomicU8::new(ListenerStatus::Listening as u8),
            local_addr,
            connections: Registry::new(),
            protocol,
            closed,
            user_data: UserData::new(),
        })
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn status(&self) -> ListenerStatus {
        ListenerStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_listening(&self) -> bool {
        self.status() == ListenerStatus::Listening
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn protocol(&self) -> Option<&Arc<P>> {
        self.protocol.as_ref()
    }

    /// Number of live connections accepted by this listener.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of live accepted connections, in id order.
    pub fn connections(&self) -> Vec<Arc<Connection<P>>> {
        self.connections.snapshot()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection<P>>> {
        self.connections.get(&id)
    }

    pub fn user_data(&self) -> &UserData {
        &self.user_data
    }

    /// Listening → Broken. Returns `true` for the single caller that wins.
    pub(crate) fn mark_broken(&self) -> bool {
        self.status
            .compare_exchange(
                ListenerStatus::Listening as u8,
                ListenerStatus::Broken as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Stop the accept loop; the socket is dropped when it exits.
    pub(crate) fn shut(&self) {
        self.closed.send_replace(true);
    }
}

impl<P: Protocol> fmt::Debug for Listener<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connections.len())
            .finish()
    }
}

/// Start the accept loop for a freshly bound socket.
pub(crate) fn spawn_accept<P: Protocol>(shared: &Arc<Shared<P>>, listener: Arc<Listener<P>>, socket: TcpListener) {
    let owner = listener.id().as_u64();
    spawn_supervised("accept", owner, accept_loop(Arc::clone(shared), listener, socket));
}

async fn accept_loop<P: Protocol>(shared: Arc<Shared<P>>, listener: Arc<Listener<P>>, socket: TcpListener) {
    let mut closed = listener.closed.subscribe();
    let pause = Duration::from_millis(shared.config().accept_error_pause_ms);

    loop {
        let accepted = tokio::select! {
            res = socket.accept() => res,
            _ = closed.wait_for(|c| *c) => break,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                if !listener.is_listening() {
                    break;
                }
                tracing::warn!(listener_id = %listener.id(), error = %e, "Accept failed");
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                continue;
            }
        };

        admit(&shared, &listener, stream, peer_addr).await;
        if !listener.is_listening() {
            break;
        }
    }

    tracing::info!(listener_id = %listener.id(), address = %listener.local_addr(), "Listener stopped");
}

/// Turn an accepted socket into a registered, running connection.
async fn admit<P: Protocol>(
    shared: &Arc<Shared<P>>,
    listener: &Arc<Listener<P>>,
    stream: TcpStream,
    peer_addr: SocketAddr,
) {
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!(listener_id = %listener.id(), peer_addr = %peer_addr, error = %e, "Dropping accepted socket");
            return;
        }
    };

    let (conn, mailbox) = Connection::new(
        shared.next_connection_id(),
        Some(listener.id()),
        local_addr,
        peer_addr,
        listener.protocol.clone(),
        shared.config().mailbox_capacity,
    );

    if let Some(proto) = conn.protocol() {
        if !proto.filter_accept(&conn) {
            // Socket is closed when `stream` drops here.
            conn.mark_broken();
            metrics::record_connection_rejected();
            tracing::debug!(connection_id = %conn.id(), peer_addr = %peer_addr, "Connection rejected by accept filter");
            return;
        }
    }

    listener.connections.insert(conn.id(), Arc::clone(&conn));
    metrics::record_connection_opened("server");

    // close_listen may have swept the registry between accept and insert.
    if !listener.is_listening() {
        evict(listener, &conn);
        return;
    }

    tracing::debug!(
        connection_id = %conn.id(),
        listener_id = %listener.id(),
        peer_addr = %peer_addr,
        "Connection accepted"
    );

    // A full event queue must not keep the accept socket alive past close_listen.
    let mut closed = listener.closed.subscribe();
    tokio::select! {
        _ = shared.emit(Event::NewConnection(Arc::clone(&conn))) => {}
        _ = closed.wait_for(|c| *c) => {
            evict(listener, &conn);
            return;
        }
    }

    if !conn.is_connected() {
        return;
    }
    spawn_io(shared, conn, stream, mailbox);
}

/// Tear down a connection its listener no longer wants, unless someone else already has.
fn evict<P: Protocol>(listener: &Listener<P>, conn: &Connection<P>) {
    if conn.mark_broken() {
        conn.shut();
        listener.connections.remove(&conn.id());
        metrics::record_connection_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Unframed;

    #[test]
    fn listener_id_display() {
        assert_eq!(ListenerId::new(3).to_string(), "listener-3");
    }

    #[test]
    fn close_is_one_shot() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Listener::<Unframed>::new(ListenerId::new(1), addr, None);
        assert!(listener.is_listening());
        assert!(listener.mark_broken());
        assert!(!listener.mark_broken());
        assert_eq!(listener.status(), ListenerStatus::Broken);
        assert_eq!(listener.connection_count(), 0);
    }
}
