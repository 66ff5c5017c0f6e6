//! The engine: registries, id allocation, the event queue, and the public API.
//!
//! # Data Flow
//! ```text
//! listen()  → bind → Listener registered → accept task
//! connect() → dial → Connection registered (client registry) → read/write tasks
//!
//! tasks ──emit──▶ bounded event queue ──poll_event()──▶ application
//! application ──send_data()──▶ connection mailbox ──▶ write task ──▶ socket
//! ```
//!
//! The application never gets callbacks: everything asynchronous arrives as
//! an [`Event`] from [`Engine::poll_event`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::EngineConfig;
use crate::net::connection::{spawn_io, Connection, ConnectionId};
use crate::net::error::{NetError, Result};
use crate::net::event::{Event, Payload};
use crate::net::listener::{spawn_accept, Listener, ListenerId};
use crate::net::protocol::{Protocol, Unframed};
use crate::net::registry::Registry;
use crate::net::slot::UserData;
use crate::observability::metrics;

/// State shared between the engine handle and every background task.
pub(crate) struct Shared<P: Protocol> {
    config: EngineConfig,
    events_tx: mpsc::Sender<Event<P>>,
    events_rx: Mutex<mpsc::Receiver<Event<P>>>,
    listeners: Registry<ListenerId, Listener<P>>,
    clients: Registry<ConnectionId, Connection<P>>,
    next_id: AtomicU64,
    destroyed: AtomicBool,
    /// Mirrors `destroyed` for tasks blocked in `emit` or `poll_event`.
    shutdown: watch::Sender<bool>,
    user_data: UserData,
}

impl<P: Protocol> Shared<P> {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id())
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId::new(self.next_id())
    }

    /// Queue an event, waiting for room if the queue is full.
    ///
    /// Dropped silently once the engine is destroyed.
    pub(crate) async fn emit(&self, event: Event<P>) {
        if self.is_destroyed() {
            return;
        }
        let kind = event.kind();
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            sent = self.events_tx.send(event) => {
                if sent.is_ok() {
                    metrics::record_event(kind);
                }
            }
            _ = shutdown.wait_for(|d| *d) => {
                tracing::trace!(kind = %kind, "Event dropped, engine destroyed");
            }
        }
    }

    /// Tear a connection down and remove it from its registry.
    ///
    /// Returns `false` if the connection was already broken.
    pub(crate) fn teardown(&self, conn: &Connection<P>) -> bool {
        if !conn.mark_broken() {
            return false;
        }
        conn.shut();

        match conn.listener_id() {
            Some(listener_id) => {
                if let Some(listener) = self.listeners.get(&listener_id) {
                    listener.connections.remove(&conn.id());
                }
            }
            None => {
                self.clients.remove(&conn.id());
            }
        }
        metrics::record_connection_closed();
        true
    }
}

/// Event-driven TCP engine.
///
/// Cloning is cheap; all clones drive the same engine.
pub struct Engine<P: Protocol = Unframed> {
    shared: Arc<Shared<P>>,
}

impl<P: Protocol> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Protocol> Default for Engine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> Engine<P> {
    /// Create an engine with default tunables.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                events_tx,
                events_rx: Mutex::new(events_rx),
                listeners: Registry::new(),
                clients: Registry::new(),
                next_id: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
                shutdown,
                user_data: UserData::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Bind a TCP listener on `address` and start accepting.
    ///
    /// Accepted connections inherit `protocol`.
    pub async fn listen(&self, address: &str, protocol: Option<Arc<P>>) -> Result<Arc<Listener<P>>> {
        self.ensure_alive()?;

        let bind_err = |source| NetError::Bind {
            address: address.to_string(),
            source,
        };
        let socket = TcpListener::bind(address).await.map_err(bind_err)?;
        let local_addr: SocketAddr = socket.local_addr().map_err(bind_err)?;

        let listener = Listener::new(self.shared.next_listener_id(), local_addr, protocol);
        self.shared.listeners.insert(listener.id(), Arc::clone(&listener));

        if self.shared.is_destroyed() {
            self.close_listen(&listener);
            return Err(NetError::Destroyed);
        }

        tracing::info!(listener_id = %listener.id(), address = %local_addr, "Listener bound");

        spawn_accept(&self.shared, Arc::clone(&listener), socket);
        Ok(listener)
    }

    /// Dial `address` and register the connection as a client connection.
    ///
    /// No `NewConnection` event is emitted for client connections.
    pub async fn connect(&self, address: &str, protocol: Option<Arc<P>>) -> Result<Arc<Connection<P>>> {
        self.ensure_alive()?;

        let connect_err = |source| NetError::Connect {
            address: address.to_string(),
            source,
        };
        let stream = TcpStream::connect(address).await.map_err(connect_err)?;
        let local_addr = stream.local_addr().map_err(connect_err)?;
        let remote_addr = stream.peer_addr().map_err(connect_err)?;

        let (conn, mailbox) = Connection::new(
            self.shared.next_connection_id(),
            None,
            local_addr,
            remote_addr,
            protocol,
            self.shared.config.mailbox_capacity,
        );
        self.shared.clients.insert(conn.id(), Arc::clone(&conn));
        metrics::record_connection_opened("client");

        // destroy() may have swept the client registry while we were dialing.
        if self.shared.is_destroyed() {
            self.shared.teardown(&conn);
            return Err(NetError::Destroyed);
        }

        tracing::debug!(connection_id = %conn.id(), remote_addr = %remote_addr, "Connected");

        spawn_io(&self.shared, Arc::clone(&conn), stream, mailbox);
        Ok(conn)
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns [`Event::Timeout`] if nothing arrives in time and
    /// [`NetError::Destroyed`] once the engine has been destroyed.
    pub async fn poll_event(&self, timeout: Duration) -> Result<Event<P>> {
        self.ensure_alive()?;

        let next = async {
            let mut shutdown = self.shared.shutdown.subscribe();
            let mut events = self.shared.events_rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|d| *d) => Err(NetError::Destroyed),
                event = events.recv() => event.ok_or(NetError::Destroyed),
            }
        };

        match tokio::time::timeout(timeout, next).await {
            Ok(res) => res,
            Err(_) => Ok(Event::Timeout),
        }
    }

    /// Queue `payload` on the connection's mailbox.
    ///
    /// Without a protocol only raw bytes are accepted. With one, only messages
    /// are accepted and every message goes through [`Protocol::serialize`].
    /// Waits if the mailbox is full.
    pub async fn send_data(&self, conn: &Connection<P>, payload: impl Into<Payload<P::Message>>) -> Result<()> {
        self.ensure_alive()?;
        if !conn.is_connected() {
            return Err(NetError::NotConnected);
        }

        let frame = match (conn.protocol(), payload.into()) {
            (None, Payload::Raw(bytes)) => bytes,
            (Some(proto), Payload::Message(message)) => proto.serialize(&message)?,
            (None, Payload::Message(_)) | (Some(_), Payload::Raw(_)) => return Err(NetError::TypeMismatch),
        };

        let mailbox = conn.mailbox().ok_or(NetError::NotConnected)?;
        mailbox.send(frame).await.map_err(|_| NetError::MailboxClosed)
    }

    /// Close a connection. Idempotent; returns `true` if this call closed it.
    ///
    /// No terminal event is emitted for an explicit close.
    pub fn close_conn(&self, conn: &Connection<P>) -> bool {
        let closed = self.shared.teardown(conn);
        if closed {
            tracing::debug!(connection_id = %conn.id(), "Connection closed");
        }
        closed
    }

    /// Close a listener and every connection it accepted. Idempotent.
    pub fn close_listen(&self, listener: &Listener<P>) -> bool {
        if !listener.mark_broken() {
            return false;
        }
        for conn in listener.connections.snapshot() {
            self.shared.teardown(&conn);
        }
        listener.shut();
        self.shared.listeners.remove(&listener.id());

        tracing::info!(listener_id = %listener.id(), address = %listener.local_addr(), "Listener closed");
        true
    }

    /// Shut the engine down: close the event queue, every client connection
    /// and every listener.
    ///
    /// A second call returns [`NetError::AlreadyDestroyed`].
    pub fn destroy(&self) -> Result<()> {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return Err(NetError::AlreadyDestroyed);
        }
        self.shared.shutdown.send_replace(true);

        for conn in self.shared.clients.snapshot() {
            self.shared.teardown(&conn);
        }
        for listener in self.shared.listeners.snapshot() {
            self.close_listen(&listener);
        }

        tracing::info!("Engine destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// Snapshot of open listeners, in id order.
    pub fn listeners(&self) -> Vec<Arc<Listener<P>>> {
        self.shared.listeners.snapshot()
    }

    pub fn listener(&self, id: ListenerId) -> Option<Arc<Listener<P>>> {
        self.shared.listeners.get(&id)
    }

    /// Snapshot of live client-initiated connections, in id order.
    pub fn client_connections(&self) -> Vec<Arc<Connection<P>>> {
        self.shared.clients.snapshot()
    }

    pub fn client_connection(&self, id: ConnectionId) -> Option<Arc<Connection<P>>> {
        self.shared.clients.get(&id)
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    pub fn user_data(&self) -> &UserData {
        &self.shared.user_data
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shared.is_destroyed() {
            Err(NetError::Destroyed)
        } else {
            Ok(())
        }
    }
}
