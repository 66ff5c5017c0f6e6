//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net/ (accept, read, write, teardown)
//!     → tracing events with connection_id / listener_id fields
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs fmt subscriber (stdout)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
