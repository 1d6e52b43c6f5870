//! Server configuration
//!
//! Built once by the binary (or a test) and handed to the server explicitly.

use std::time::Duration;

/// Where session state lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: String,
    pub store: StoreBackend,
    /// A connection that sends nothing for this long is treated as gone
    pub idle_timeout: Duration,
    /// Per-subscriber snapshot queue length before the oldest are dropped
    pub broadcast_capacity: usize,
    /// How long a session's coordinator worker lingers without commands
    pub worker_idle: Duration,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    /// Ephemeral port, in-memory store, short timeouts
    pub fn for_tests() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            store: StoreBackend::Memory,
            idle_timeout: Duration::from_secs(10),
            broadcast_capacity: 32,
            worker_idle: Duration::from_secs(5),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8088".into(),
            store: StoreBackend::Memory,
            idle_timeout: Duration::from_secs(300),
            broadcast_capacity: 64,
            worker_idle: Duration::from_secs(60),
        }
    }
}
