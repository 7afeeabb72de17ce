//! Serial transport: USB CDC devices reached through the OS serial stack.
//!
//! # Lifecycle (for beginners)
//!
//! 1. Open the port at 256 000 baud.
//! 2. Write the HTTP-upgrade handshake literal, unframed.
//! 3. Read until the reply holds at least eight bytes and check that it
//!    starts with `HTTP/1.1`.  Anything else fails the connection.
//! 4. Split the stream.  A reader task accumulates bytes in a
//!    [`FrameDecoder`] and forwards each complete frame as a
//!    [`TransportEvent::Message`].
//! 5. Outbound messages get the magic-byte frame header and are written
//!    behind a mutex so frames never interleave.
//!
//! The same plumbing drives the browser-serial transport; only the way the
//! port is opened differs (see [`PortOpener`]).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use loupedeck_core::domain::profile::KNOWN_VENDOR_IDS;
use loupedeck_core::protocol::framing::{encode_frame, FrameDecoder};
use serialport::{SerialPortInfo, SerialPortType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

use super::{
    ConnectionDescriptor, Discovery, DiscoveryError, Endpoint, EventSender, Transport,
    TransportError, TransportEvent, TransportKind, TransportOptions,
};

/// Line rate expected by the device firmware.
pub const BAUD_RATE: u32 = 256_000;

/// Upgrade request written, unframed, right after the port opens.
pub const HANDSHAKE_REQUEST: &[u8] = b"GET /index.html\nHTTP/1.1\nConnection: Upgrade\nUpgrade: websocket\nSec-WebSocket-Key: 123abc\n\n";

/// Prefix a valid handshake reply must start with.
pub const HANDSHAKE_REPLY_PREFIX: &[u8] = b"HTTP/1.1";

/// Manufacturer string reported by Loupedeck USB descriptors.
pub const LOUPEDECK_MANUFACTURER: &str = "Loupedeck";

const READ_CHUNK: usize = 4096;

// ── Stream plumbing ───────────────────────────────────────────────────────────

/// Any byte stream a serial port can be driven through.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

pub type BoxedSerialIo = Box<dyn SerialIo>;

/// Opens the underlying byte stream of a serial-style transport.
#[async_trait]
pub trait PortOpener: Send + Sync {
    async fn open(&self, baud_rate: u32) -> io::Result<BoxedSerialIo>;

    /// Address reported in connect events.
    fn address(&self) -> String;
}

/// Opens an OS serial device by path.
#[derive(Debug, Clone)]
pub struct NativePort {
    path: String,
}

impl NativePort {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PortOpener for NativePort {
    async fn open(&self, baud_rate: u32) -> io::Result<BoxedSerialIo> {
        let stream = tokio_serial::new(&self.path, baud_rate).open_native_async()?;
        Ok(Box::new(stream))
    }

    fn address(&self) -> String {
        self.path.clone()
    }
}

/// Performs the upgrade handshake on a freshly opened stream.
///
/// # Errors
///
/// - [`TransportError::Handshake`] if the reply does not start with `HTTP/1.1`.
/// - [`TransportError::Closed`] if the stream ends before eight bytes arrive.
/// - [`TransportError::Timeout`] if no complete reply arrives within `timeout`.
pub async fn handshake<S>(stream: &mut S, timeout: Duration) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        stream.write_all(HANDSHAKE_REQUEST).await?;
        stream.flush().await?;

        let mut reply = Vec::with_capacity(64);
        let mut chunk = [0u8; 256];
        while reply.len() < HANDSHAKE_REPLY_PREFIX.len() {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            reply.extend_from_slice(&chunk[..n]);
        }

        if !reply.starts_with(HANDSHAKE_REPLY_PREFIX) {
            return Err(TransportError::Handshake(
                String::from_utf8_lossy(&reply).into_owned(),
            ));
        }
        debug!("handshake reply: {:?}", String::from_utf8_lossy(&reply));
        Ok(())
    };

    time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransportError::Timeout)?
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Magic-byte framed transport over a serial-style byte stream.
pub struct SerialTransport {
    kind: TransportKind,
    opener: Arc<dyn PortOpener>,
    options: TransportOptions,
    writer: Mutex<Option<WriteHalf<BoxedSerialIo>>>,
    ready: Arc<AtomicBool>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    events: StdMutex<Option<EventSender>>,
}

impl SerialTransport {
    /// Transport for the OS serial device at `path`.
    pub fn new(path: impl Into<String>, options: TransportOptions) -> Self {
        Self::with_opener(TransportKind::Serial, Arc::new(NativePort::new(path)), options)
    }

    /// Transport driven through a custom [`PortOpener`].
    pub fn with_opener(
        kind: TransportKind,
        opener: Arc<dyn PortOpener>,
        options: TransportOptions,
    ) -> Self {
        Self {
            kind,
            opener,
            options,
            writer: Mutex::new(None),
            ready: Arc::new(AtomicBool::new(false)),
            reader: StdMutex::new(None),
            events: StdMutex::new(None),
        }
    }

    /// Reads frames until the stream ends or fails, then reports the
    /// disconnect unless `close` already did.
    async fn read_loop(
        mut reader: ReadHalf<BoxedSerialIo>,
        events: EventSender,
        ready: Arc<AtomicBool>,
    ) {
        let mut decoder = FrameDecoder::default();
        let mut buf = vec![0u8; READ_CHUNK];

        let error = loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    if let Some(tail) = decoder.finish() {
                        let _ = events.send(TransportEvent::Message(tail)).await;
                    }
                    break Some(TransportError::Closed);
                }
                Ok(n) => {
                    trace!("read {n} bytes");
                    for frame in decoder.decode(&buf[..n]) {
                        if events.send(TransportEvent::Message(frame)).await.is_err() {
                            debug!("event receiver dropped; stopping reader");
                            return;
                        }
                    }
                }
                Err(e) => break Some(TransportError::from(e)),
            }
        };

        if ready.swap(false, Ordering::SeqCst) {
            warn!("serial link lost: {:?}", error);
            let _ = events.send(TransportEvent::Disconnected { error }).await;
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self, events: EventSender) -> Result<(), TransportError> {
        let address = self.opener.address();
        debug!("opening {address} at {} baud", self.options.baud_rate);

        let mut stream = self.opener.open(self.options.baud_rate).await?;
        handshake(&mut stream, self.options.handshake_timeout).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        self.ready.store(true, Ordering::SeqCst);
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events.clone());

        info!("serial link up on {address}");
        let _ = events.send(TransportEvent::Connected { address }).await;

        let handle = tokio::spawn(Self::read_loop(read_half, events, Arc::clone(&self.ready)));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotConnected);
        }
        let frame = encode_frame(message);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
        if self.ready.swap(false, Ordering::SeqCst) {
            info!("serial link closed");
            if let Some(events) = events {
                let _ = events.send(TransportEvent::Disconnected { error: None }).await;
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Returns `true` for ports that belong to a supported device.
pub fn is_supported_port(port: &SerialPortInfo) -> bool {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            usb.manufacturer.as_deref() == Some(LOUPEDECK_MANUFACTURER)
                || KNOWN_VENDOR_IDS.contains(&usb.vid)
        }
        _ => false,
    }
}

/// Builds a descriptor for a supported port.
pub fn descriptor_for(port: &SerialPortInfo) -> Option<ConnectionDescriptor> {
    if !is_supported_port(port) {
        return None;
    }
    let SerialPortType::UsbPort(usb) = &port.port_type else {
        return None;
    };
    Some(ConnectionDescriptor {
        kind: TransportKind::Serial,
        endpoint: Endpoint::Path(port.port_name.clone()),
        vendor_id: Some(usb.vid),
        product_id: Some(usb.pid),
        serial_number: usb.serial_number.clone(),
    })
}

/// Lists supported devices among the OS serial ports.
///
/// # Errors
///
/// [`DiscoveryError::Enumeration`] if the OS refuses to list ports.
pub async fn list_ports() -> Result<Vec<ConnectionDescriptor>, DiscoveryError> {
    let ports = tokio::task::spawn_blocking(serialport::available_ports)
        .await
        .map_err(|e| DiscoveryError::Enumeration(e.to_string()))?
        .map_err(|e| DiscoveryError::Enumeration(e.to_string()))?;

    Ok(ports.iter().filter_map(descriptor_for).collect())
}

/// [`Discovery`] over the OS serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialDiscovery;

#[async_trait]
impl Discovery for SerialDiscovery {
    async fn discover(&self) -> Vec<ConnectionDescriptor> {
        match list_ports().await {
            Ok(found) => {
                debug!("serial discovery found {} device(s)", found.len());
                found
            }
            Err(e) => {
                warn!("{e}");
                Vec::new()
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
