//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the multi-protocol server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Protocol sniffing limits.
    pub sniff: SniffConfig,

    /// Per-socket tuning applied to every accepted connection.
    pub socket: SocketConfig,

    /// Recyclable task pool sizing.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Protocol sniffing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SniffConfig {
    /// Maximum bytes buffered per connection while deciding the protocol.
    /// A connection still undecided past this bound is closed.
    pub max_bytes: usize,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self { max_bytes: 4096 }
    }
}

/// Per-socket tuning.
///
/// Defaults mirror a conservative production server: Nagle left on,
/// errored sockets closed automatically, and a 32 KiB high watermark on
/// pending writes before the writability signal drops.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm on accepted sockets.
    pub nodelay: bool,

    /// Close the connection when a write fails.
    pub auto_close: bool,

    /// Consecutive writes a channel writer performs before yielding.
    pub write_spin_count: usize,

    /// Pending outbound bytes above which the channel reports unwritable.
    pub write_buffer_high: usize,

    /// Pending outbound bytes below which writability is restored.
    pub write_buffer_low: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            nodelay: false,
            auto_close: true,
            write_spin_count: 16,
            write_buffer_high: 32 * 1024,
            write_buffer_low: 8 * 1024,
        }
    }
}

/// Recyclable task pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle task instances retained after release.
    pub max_idle_tasks: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_tasks: 256,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is not set.
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "portmux=info".to_string(),
        }
    }
}
