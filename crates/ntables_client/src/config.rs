//! Configuration for clients and their transport.

use ntables_core::{Endpoint, DEFAULT_EVENT_CAPACITY, DEFAULT_PORT};
use std::time::Duration;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Default interval between keep-alive messages.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity sent in `CLIENT_HELLO`.
    pub identity: String,
    /// Server to connect to.
    pub endpoint: Endpoint,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Interval between keep-alive messages while connected.
    pub keep_alive_interval: Duration,
    /// Events buffered per subscriber.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(identity: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            identity: identity.into(),
            endpoint,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the keep-alive interval.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the per-subscriber event buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Derives the transport configuration.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig::new(self.endpoint.clone())
            .with_reconnect_delay(self.reconnect_delay)
            .with_ident(self.identity.clone())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("ntables", Endpoint::new("localhost", DEFAULT_PORT))
    }
}

/// Configuration for a [`ResilientSocket`](crate::ResilientSocket).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Initial endpoint.
    pub endpoint: Endpoint,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Label used in log lines.
    pub ident: String,
}

impl TransportConfig {
    /// Creates a transport configuration.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ident: String::new(),
        }
    }

    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the log label.
    pub fn with_ident(mut self, ident: impl Into<String>) -> Self {
        self.ident = ident.into();
        self
    }
}
