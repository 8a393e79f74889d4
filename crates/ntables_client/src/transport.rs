//! Re-targetable, reconnecting TCP transport.
//!
//! A [`ResilientSocket`] keeps one logical connection to an endpoint alive
//! across physical reconnects. A driver task owns the `TcpStream`; the
//! handle talks to it through channels and reports what happens as an
//! ordered stream of [`TransportEvent`]s.

use crate::config::TransportConfig;
use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use ntables_core::Endpoint;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Something that happened to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session is up.
    Connected,
    /// Bytes arrived, forwarded as read.
    Data(Bytes),
    /// The session ended. `requested` is true when `disconnect` ended it.
    Closed {
        /// Whether the close was asked for.
        requested: bool,
    },
    /// About to try connecting again.
    ReconnectAttempt {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
}

struct Outbound {
    bytes: Bytes,
    ack: Option<oneshot::Sender<io::Result<()>>>,
}

struct Shared {
    endpoint: Endpoint,
    driver: Option<JoinHandle<()>>,
    session: Option<mpsc::UnboundedSender<Outbound>>,
    /// Bumped on every connect/disconnect; a driver only reports while its
    /// generation is current.
    generation: u64,
}

/// A TCP socket that reconnects forever and can be re-targeted live.
///
/// Must be used from within a tokio runtime.
pub struct ResilientSocket {
    config: TransportConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ResilientSocket {
    /// Creates a disconnected socket and the stream of its events.
    pub fn new(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Shared {
            endpoint: config.endpoint.clone(),
            driver: None,
            session: None,
            generation: 0,
        };
        let socket = Self {
            config,
            shared: Arc::new(Mutex::new(shared)),
            events,
        };
        (socket, receiver)
    }

    /// Current target endpoint.
    pub fn endpoint(&self) -> Endpoint {
        self.shared.lock().endpoint.clone()
    }

    /// Returns true while a session is up.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().session.is_some()
    }

    /// Returns true between `connect` and `disconnect`.
    pub fn is_active(&self) -> bool {
        self.shared.lock().driver.is_some()
    }

    /// Starts connecting. Does nothing if already connected or connecting.
    pub fn connect(&self) {
        let mut shared = self.shared.lock();
        self.start_driver(&mut shared);
    }

    /// Tears down the session and cancels any pending reconnect.
    ///
    /// Emits `Closed { requested: true }` if a session was up. Calling this
    /// while disconnected does nothing.
    pub fn disconnect(&self) {
        let mut shared = self.shared.lock();
        self.stop_driver(&mut shared);
    }

    /// Changes the target host.
    pub fn set_address(&self, host: impl Into<String>) {
        let port = self.shared.lock().endpoint.port;
        self.set_endpoint(Endpoint::new(host, port));
    }

    /// Changes the target port.
    pub fn set_port(&self, port: u16) {
        let host = self.shared.lock().endpoint.host.clone();
        self.set_endpoint(Endpoint::new(host, port));
    }

    /// Changes the target endpoint.
    ///
    /// While connected this disconnects and immediately reconnects to the
    /// new endpoint. Otherwise only the stored endpoint changes; a pending
    /// reconnect picks it up.
    pub fn set_endpoint(&self, endpoint: Endpoint) {
        let mut shared = self.shared.lock();
        if shared.endpoint == endpoint {
            return;
        }
        info!(ident = %self.config.ident, from = %shared.endpoint, to = %endpoint, "retargeting");
        shared.endpoint = endpoint;
        if shared.session.is_some() {
            self.stop_driver(&mut shared);
            self.start_driver(&mut shared);
        }
    }

    /// Queues bytes for writing. Order is preserved.
    pub fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        let shared = self.shared.lock();
        let session = shared.session.as_ref().ok_or(TransportError::NotConnected)?;
        session
            .send(Outbound { bytes, ack: None })
            .map_err(|_| TransportError::SessionClosed)
    }

    /// Writes bytes and waits until the OS has accepted them.
    pub async fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        {
            let shared = self.shared.lock();
            let session = shared.session.as_ref().ok_or(TransportError::NotConnected)?;
            session
                .send(Outbound {
                    bytes,
                    ack: Some(ack),
                })
                .map_err(|_| TransportError::SessionClosed)?;
        }
        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TransportError::Io {
                message: err.to_string(),
            }),
            Err(_) => Err(TransportError::SessionClosed),
        }
    }

    fn start_driver(&self, shared: &mut Shared) {
        if shared.driver.is_some() {
            return;
        }
        shared.generation += 1;
        let driver = Driver {
            generation: shared.generation,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            config: self.config.clone(),
        };
        shared.driver = Some(tokio::spawn(driver.run()));
    }

    fn stop_driver(&self, shared: &mut Shared) {
        let Some(driver) = shared.driver.take() else {
            debug!(ident = %self.config.ident, "socket not connected during disconnect");
            return;
        };
        shared.generation += 1;
        driver.abort();
        if shared.session.take().is_some() {
            info!(ident = %self.config.ident, endpoint = %shared.endpoint, "disconnected");
            let _ = self.events.send(TransportEvent::Closed { requested: true });
        }
    }
}

impl Drop for ResilientSocket {
    fn drop(&mut self) {
        if let Some(driver) = self.shared.lock().driver.take() {
            driver.abort();
        }
    }
}

/// The task behind a [`ResilientSocket`].
struct Driver {
    generation: u64,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    config: TransportConfig,
}

impl Driver {
    /// Sends `event` if this driver is still current; runs `update` first
    /// under the same lock.
    fn report(&self, event: TransportEvent, update: impl FnOnce(&mut Shared)) -> bool {
        let mut shared = self.shared.lock();
        if shared.generation != self.generation {
            return false;
        }
        update(&mut shared);
        self.events.send(event).is_ok()
    }

    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            let endpoint = self.shared.lock().endpoint.clone();
            match TcpStream::connect(endpoint.socket_addr()).await {
                Ok(stream) => {
                    attempt = 0;
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(error = %err, "failed to set TCP_NODELAY");
                    }
                    let (tx, rx) = mpsc::unbounded_channel();
                    if !self.report(TransportEvent::Connected, |s| s.session = Some(tx)) {
                        return;
                    }
                    info!(ident = %self.config.ident, %endpoint, "connected");

                    let (reader, writer) = stream.into_split();
                    tokio::select! {
                        result = self.read_loop(reader) => {
                            match result {
                                Ok(()) => info!(ident = %self.config.ident, %endpoint, "connection closed by peer"),
                                Err(err) => warn!(ident = %self.config.ident, %endpoint, error = %err, "read failed"),
                            }
                        }
                        result = write_loop(writer, rx) => {
                            if let Err(err) = result {
                                warn!(ident = %self.config.ident, %endpoint, error = %err, "write failed");
                            }
                        }
                    }

                    let closed = TransportEvent::Closed { requested: false };
                    if !self.report(closed, |s| s.session = None) {
                        return;
                    }
                }
                Err(err) => {
                    debug!(ident = %self.config.ident, %endpoint, error = %err, "connect failed");
                }
            }

            tokio::time::sleep(self.config.reconnect_delay).await;
            attempt = attempt.saturating_add(1);
            let endpoint = self.shared.lock().endpoint.clone();
            info!(ident = %self.config.ident, %endpoint, attempt, "reconnecting");
            if !self.report(TransportEvent::ReconnectAttempt { attempt }, |_| {}) {
                return;
            }
        }
    }

    /// Forwards inbound bytes until EOF or error.
    async fn read_loop(&self, mut reader: OwnedReadHalf) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            buf.reserve(READ_BUFFER_SIZE);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let data = buf.split().freeze();
            if !self.report(TransportEvent::Data(data), |_| {}) {
                return Ok(());
            }
        }
    }
}

/// Writes queued frames in order until the queue closes or a write fails.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) -> io::Result<()> {
    while let Some(Outbound { bytes, ack }) = queue.recv().await {
        let result = writer.write_all(&bytes).await;
        let failed = result.as_ref().err().map(|e| io::Error::new(e.kind(), e.to_string()));
        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
        if let Some(err) = failed {
            return Err(err);
        }
    }
    Ok(())
}
