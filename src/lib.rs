//! Event-driven TCP networking engine.
//!
//! The engine owns listeners and connections, runs a read task and a write
//! task per connection, applies an optional pluggable framing
//! [`Protocol`](net::Protocol), and reports everything that happens through a
//! single bounded event queue drained with [`Engine::poll_event`].
//!
//! ```no_run
//! use std::time::Duration;
//! use eventnet::net::{Engine, Event};
//!
//! # async fn run() -> eventnet::net::Result<()> {
//! let engine: Engine = Engine::new();
//! engine.listen("127.0.0.1:7000", None).await?;
//! loop {
//!     match engine.poll_event(Duration::from_millis(500)).await? {
//!         Event::NewConnectionData(conn, data) => {
//!             engine.send_data(&conn, data).await?;
//!         }
//!         Event::Timeout => {}
//!         other => tracing::debug!(event = ?other, "event"),
//!     }
//! }
//! # }
//! ```

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{Config, EngineConfig};
pub use lifecycle::Shutdown;
pub use net::Engine;
