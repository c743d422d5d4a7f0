//! Network module - Listening servers, connections and protocol dispatch
//!
//! Provides:
//! - `ServerRegistry` and `Server` for port binding and protocol multiplexing
//! - `Connection` for the per-socket read/parse/dispatch cycle
//! - `Protocol` and `ProtocolService` traits implemented by applications

mod connection;
mod server;
mod service;

pub use connection::*;
pub use server::*;
pub use service::*;

use std::time::Duration;

/// Tunables for a connection's bounded reads
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Wall-clock deadline for reading one header or one body, in ms
    pub read_timeout_ms: u64,
    /// How many short reads are tolerated per header or body
    pub max_read_attempts: u32,
    /// Initial capacity of the per-connection receive buffer
    pub read_buffer_capacity: usize,
    /// Depth of the outbound frame queue
    pub outbound_queue_depth: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 30_000,
            max_read_attempts: 30,
            read_buffer_capacity: 4096,
            outbound_queue_depth: 64,
        }
    }
}

impl ConnectionSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
