//! Server configuration.

use ntables_core::DEFAULT_PORT;
use std::net::SocketAddr;

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Identity announced in `SERVER_HELLO`.
    pub identity: String,
    /// Maximum concurrent connections. Further connections are closed on
    /// accept.
    pub max_connections: usize,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            identity: String::new(),
            max_connections: 1000,
            event_capacity: ntables_core::DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the identity announced to clients.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))
    }
}
