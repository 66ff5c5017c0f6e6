//! Network engine subsystem.
//!
//! # Data Flow
//! ```text
//! Engine::listen
//!     → listener.rs (bind, accept loop, accept filter)
//!     → connection.rs (read task + write task per connection)
//!     → protocol.rs (optional framing: header → body length → parse)
//!     → event.rs (one tagged event per state change or message)
//!     → engine.rs (bounded FIFO, drained by Engine::poll_event)
//!
//! Connection States:
//!     Connected → Broken
//! Listener States:
//!     Listening → Broken
//! ```
//!
//! # Design Decisions
//! - One shared bounded event queue; producers block when it is full
//! - Registries are mutex-guarded maps, never locked across an await
//! - Connections refer to their listener by id, resolved through the registry
//! - At most one terminal event per connection

pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod slot;
mod task;

pub use connection::{Connection, ConnectionId, ConnectionStatus};
pub use engine::Engine;
pub use error::{NetError, Result};
pub use event::{Event, EventKind, Payload};
pub use listener::{Listener, ListenerId, ListenerStatus};
pub use protocol::{Protocol, ProtocolError, Unframed};
pub use slot::UserData;
