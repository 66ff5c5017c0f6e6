//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Engine tunables (queue sizes, read chunking).
    pub engine: EngineConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Engine tunables.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the shared event queue. Producers block when it is full.
    pub event_queue_capacity: usize,

    /// Capacity of each connection's outbound mailbox, in frames.
    pub mailbox_capacity: usize,

    /// Maximum bytes delivered per read in unframed mode.
    pub read_buffer_size: usize,

    /// Pause after a failed accept before trying again, in milliseconds.
    pub accept_error_pause_ms: u64,

    /// Largest body length a protocol may announce. Larger frames are a protocol error.
    pub max_frame_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            mailbox_capacity: 1024,
            read_buffer_size: 4096,
            accept_error_pause_ms: 50,
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter directive; `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "eventnet=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.event_queue_capacity, 1024);
        assert_eq!(config.engine.mailbox_capacity, 1024);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn partial_override() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            read_buffer_size = 512

            [observability]
            log_level = "eventnet=trace"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.read_buffer_size, 512);
        assert_eq!(config.engine.mailbox_capacity, 1024);
        assert_eq!(config.observability.log_level, "eventnet=trace");
    }
}
