//! Transport abstraction and the three concrete links.
//!
//! A [`Transport`] moves whole protocol messages (header + payload) between
//! the engine and a device.  Framing, handshakes and liveness checks are the
//! transport's business; the engine only ever sees complete messages and
//! lifecycle events arriving on an `mpsc` channel.
//!
//! ```text
//! Disconnected → Connecting → [HandshakeWait] → Connected → Disconnected
//! ```
//!
//! Variants:
//! - [`serial::SerialTransport`]: OS serial port, HTTP-upgrade handshake,
//!   magic-byte framing.
//! - [`websocket::WebSocketTransport`]: network-attached devices, liveness
//!   monitor.
//! - [`browser_serial`]: the serial protocol driven through a host-provided
//!   port capability.

pub mod browser_serial;
pub mod serial;
pub mod websocket;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use self::browser_serial::BrowserPort;

/// Errors raised by transports.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The serial handshake reply did not start with `HTTP/1.1`.
    #[error("Invalid handshake response: {0}")]
    Handshake(String),

    /// The device stopped talking for longer than the liveness timeout.
    #[error("Connection timeout - was the device disconnected?")]
    Timeout,

    /// A low-level read or write failed.
    #[error("transport I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The WebSocket layer reported an error or an abnormal close.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The device closed the link without an error.
    #[error("connection closed by device")]
    Closed,

    /// A write was attempted while the link is down.
    #[error("Not connected")]
    NotConnected,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(Arc::new(e))
    }
}

/// Errors raised while looking for devices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Discovery ran but found nothing usable.
    #[error("No devices found")]
    NoDevicesFound,

    /// The OS refused to enumerate serial ports.
    #[error("failed to enumerate serial ports: {0}")]
    Enumeration(String),
}

// ── Descriptors ───────────────────────────────────────────────────────────────

/// The link type behind a [`ConnectionDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    Serial,
    WebSocket,
    BrowserSerial,
}

/// Where to reach a device.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Serial device path, e.g. `/dev/ttyACM0` or `COM3`.
    Path(String),
    /// Host (and optional port) of a network-attached device.
    Host(String),
    /// A port handed out by the host's serial capability.
    Browser(BrowserPort),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Path(path) => f.write_str(path),
            Endpoint::Host(host) => write!(f, "ws://{host}"),
            Endpoint::Browser(port) => f.write_str(&port.label()),
        }
    }
}

/// One discovered (or explicitly requested) device.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub kind: TransportKind,
    pub endpoint: Endpoint,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial_number: Option<String>,
}

impl ConnectionDescriptor {
    /// Descriptor for an explicit serial path with unknown USB ids.
    pub fn serial(path: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Serial,
            endpoint: Endpoint::Path(path.into()),
            vendor_id: None,
            product_id: None,
            serial_number: None,
        }
    }

    /// Descriptor for an explicit network host with unknown USB ids.
    pub fn websocket(host: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::WebSocket,
            endpoint: Endpoint::Host(host.into()),
            vendor_id: None,
            product_id: None,
            serial_number: None,
        }
    }

    /// Human-readable address used in logs and connect events.
    pub fn address(&self) -> String {
        self.endpoint.to_string()
    }
}

// ── Events and options ────────────────────────────────────────────────────────

/// Lifecycle and data events emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The link is ready for traffic (handshake done, if any).
    Connected { address: String },
    /// One complete inbound message.
    Message(Vec<u8>),
    /// The link went down; `error` is `None` for a clean close.
    Disconnected { error: Option<TransportError> },
}

/// Channel on which a transport reports [`TransportEvent`]s.
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Timing and line settings shared by all transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub baud_rate: u32,
    pub handshake_timeout: Duration,
    pub connection_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            baud_rate: serial::BAUD_RATE,
            handshake_timeout: Duration::from_millis(3000),
            connection_timeout: websocket::CONNECTION_TIMEOUT,
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// A message link to one device.
///
/// Implementations report exactly one `Disconnected` event per successful
/// `connect`, whether the link drops or `close` is called.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Opens the link and resolves once it is ready for traffic.
    async fn connect(&self, events: EventSender) -> Result<(), TransportError>;

    /// Writes one message, framing it if the link requires it.
    async fn send(&self, message: &[u8]) -> Result<(), TransportError>;

    /// Closes the link; a no-op if it is already down.
    async fn close(&self);

    fn is_ready(&self) -> bool;
}

/// Enumerates reachable devices of one transport kind.
///
/// Failures are logged by the implementation and reported as an empty list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Vec<ConnectionDescriptor>;
}

/// Builds a transport for a descriptor.
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        options: TransportOptions,
    ) -> Arc<dyn Transport>;
}

/// Factory for the built-in transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        options: TransportOptions,
    ) -> Arc<dyn Transport> {
        match &descriptor.endpoint {
            Endpoint::Path(path) => Arc::new(serial::SerialTransport::new(path.clone(), options)),
            Endpoint::Host(host) => {
                Arc::new(websocket::WebSocketTransport::new(host.clone(), options))
            }
            Endpoint::Browser(port) => Arc::new(browser_serial::transport_for(port.clone(), options)),
        }
    }
}

/// The discovery sources and transport factory an engine works with.
#[derive(Clone)]
pub struct TransportSet {
    pub discoverers: Vec<(TransportKind, Arc<dyn Discovery>)>,
    pub factory: Arc<dyn TransportFactory>,
}

impl TransportSet {
    /// Serial and network discovery with the built-in transports.
    pub fn native() -> Self {
        Self {
            discoverers: vec![
                (TransportKind::Serial, Arc::new(serial::SerialDiscovery) as Arc<dyn Discovery>),
                (TransportKind::WebSocket, Arc::new(websocket::WebSocketDiscovery)),
            ],
            factory: Arc::new(DefaultTransportFactory),
        }
    }

    /// Adds discovery through a host serial capability.
    pub fn with_browser_host(mut self, host: Arc<dyn browser_serial::SerialPortHost>) -> Self {
        self.discoverers.push((
            TransportKind::BrowserSerial,
            Arc::new(browser_serial::BrowserSerialDiscovery::new(host)),
        ));
        self
    }
}

impl fmt::Debug for TransportSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<TransportKind> = self.discoverers.iter().map(|(k, _)| *k).collect();
        f.debug_struct("TransportSet").field("discoverers", &kinds).finish()
    }
}
