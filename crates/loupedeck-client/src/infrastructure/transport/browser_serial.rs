//! Serial transport driven through a host-provided port capability.
//!
//! Some embedders (a browser shell, a sandboxed app) cannot open device
//! paths directly.  Instead the host hands out port objects, either ones the
//! user already granted or one picked through a permission prompt.  This
//! module adapts those objects to the regular serial plumbing: the same
//! handshake, framing and read loop as [`super::serial`].

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use loupedeck_core::domain::profile::KNOWN_VENDOR_IDS;
use tracing::{debug, warn};

use super::serial::{BoxedSerialIo, PortOpener, SerialTransport};
use super::{ConnectionDescriptor, Discovery, Endpoint, TransportError, TransportKind, TransportOptions};

/// USB identifiers a host port reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostPortInfo {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

/// A serial port object handed out by the host.
#[async_trait]
pub trait HostSerialPort: Send + Sync {
    fn info(&self) -> HostPortInfo;

    /// Label used as the connection address.
    fn label(&self) -> String;

    async fn open(&self, baud_rate: u32) -> io::Result<BoxedSerialIo>;
}

/// The host's serial capability.
#[async_trait]
pub trait SerialPortHost: Send + Sync {
    /// Ports the user already granted.
    async fn granted_ports(&self) -> Vec<Arc<dyn HostSerialPort>>;

    /// Asks the user for a port matching one of `vendor_ids`.
    async fn request_port(&self, vendor_ids: &[u16]) -> Result<Arc<dyn HostSerialPort>, TransportError>;
}

/// Cloneable handle to a host port, carried inside descriptors.
#[derive(Clone)]
pub struct BrowserPort(pub Arc<dyn HostSerialPort>);

impl BrowserPort {
    pub fn label(&self) -> String {
        self.0.label()
    }
}

impl fmt::Debug for BrowserPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BrowserPort").field(&self.0.label()).finish()
    }
}

struct HostPortOpener(BrowserPort);

#[async_trait]
impl PortOpener for HostPortOpener {
    async fn open(&self, baud_rate: u32) -> io::Result<BoxedSerialIo> {
        let BrowserPort(port) = &self.0;
        port.open(baud_rate).await
    }

    fn address(&self) -> String {
        self.0.label()
    }
}

/// Builds a serial transport over a host port.
pub fn transport_for(port: BrowserPort, options: TransportOptions) -> SerialTransport {
    SerialTransport::with_opener(
        TransportKind::BrowserSerial,
        Arc::new(HostPortOpener(port)),
        options,
    )
}

fn descriptor_for(port: Arc<dyn HostSerialPort>) -> ConnectionDescriptor {
    let info = port.info();
    ConnectionDescriptor {
        kind: TransportKind::BrowserSerial,
        endpoint: Endpoint::Browser(BrowserPort(port)),
        vendor_id: info.vendor_id,
        product_id: info.product_id,
        serial_number: None,
    }
}

/// [`Discovery`] through a [`SerialPortHost`].
///
/// Granted ports are preferred; the permission prompt only appears when
/// there are none.
pub struct BrowserSerialDiscovery {
    host: Arc<dyn SerialPortHost>,
}

impl BrowserSerialDiscovery {
    pub fn new(host: Arc<dyn SerialPortHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Discovery for BrowserSerialDiscovery {
    async fn discover(&self) -> Vec<ConnectionDescriptor> {
        let mut ports = self.host.granted_ports().await;
        if ports.is_empty() {
            match self.host.request_port(&KNOWN_VENDOR_IDS).await {
                Ok(port) => ports.push(port),
                Err(e) => warn!("Unable to open port: {e}"),
            }
        }
        debug!("host serial discovery found {} port(s)", ports.len());
        ports.into_iter().map(descriptor_for).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::infrastructure::transport::serial::HANDSHAKE_REQUEST;
    use crate::infrastructure::transport::{Transport, TransportEvent};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    struct FakePort {
        info: HostPortInfo,
        stream: Mutex<Option<DuplexStream>>,
    }

    impl FakePort {
        fn new(product_id: u16) -> Self {
            Self {
                info: HostPortInfo { vendor_id: Some(0x2ec2), product_id: Some(product_id) },
                stream: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl HostSerialPort for FakePort {
        fn info(&self) -> HostPortInfo {
            self.info
        }

        fn label(&self) -> String {
            "web-serial".to_string()
        }

        async fn open(&self, _baud_rate: u32) -> io::Result<BoxedSerialIo> {
            let stream = self.stream.lock().unwrap().take();
            stream
                .map(|s| Box::new(s) as BoxedSerialIo)
                .ok_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "port unavailable"))
        }
    }

    /// Records the vendor filter of each permission prompt.
    struct FakeHost {
        granted: Vec<Arc<dyn HostSerialPort>>,
        grant_on_request: bool,
        prompts: AtomicUsize,
        filters: Mutex<Vec<Vec<u16>>>,
    }

    #[async_trait]
    impl SerialPortHost for FakeHost {
        async fn granted_ports(&self) -> Vec<Arc<dyn HostSerialPort>> {
            self.granted.clone()
        }

        async fn request_port(&self, vendor_ids: &[u16]) -> Result<Arc<dyn HostSerialPort>, TransportError> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.filters.lock().unwrap().push(vendor_ids.to_vec());
            if self.grant_on_request {
                Ok(Arc::new(FakePort::new(0x0006)))
            } else {
                Err(TransportError::NotConnected)
            }
        }
    }

    fn host(granted: Vec<Arc<dyn HostSerialPort>>, grant_on_request: bool) -> Arc<FakeHost> {
        Arc::new(FakeHost {
            granted,
            grant_on_request,
            prompts: AtomicUsize::new(0),
            filters: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_granted_ports_skip_permission_prompt() {
        // Arrange
        let fake = host(vec![Arc::new(FakePort::new(0x0004)) as Arc<dyn HostSerialPort>], true);
        let discovery = BrowserSerialDiscovery::new(fake.clone());

        // Act
        let found = discovery.discover().await;

        // Assert
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, TransportKind::BrowserSerial);
        assert_eq!(found[0].product_id, Some(0x0004));
        assert_eq!(fake.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prompt_uses_known_vendor_filter() {
        // Arrange
        let fake = host(Vec::new(), true);
        let discovery = BrowserSerialDiscovery::new(fake.clone());

        // Act
        let found = discovery.discover().await;

        // Assert
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, Some(0x0006));
        assert_eq!(*fake.filters.lock().unwrap(), vec![vec![0x2ec2, 0x1532]]);
    }

    #[tokio::test]
    async fn test_declined_prompt_yields_no_descriptors() {
        let discovery = BrowserSerialDiscovery::new(host(Vec::new(), false));

        assert!(discovery.discover().await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_runs_serial_handshake_over_host_port() {
        // Arrange
        let (host_end, mut device) = duplex(4096);
        let port = FakePort::new(0x0004);
        *port.stream.lock().unwrap() = Some(host_end);
        let transport = transport_for(BrowserPort(Arc::new(port)), TransportOptions::default());
        let (tx, mut rx) = mpsc::channel(8);
        let device_task = tokio::spawn(async move {
            let mut request = vec![0u8; HANDSHAKE_REQUEST.len()];
            device.read_exact(&mut request).await.unwrap();
            device.write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").await.unwrap();
            device
        });

        // Act
        transport.connect(tx).await.unwrap();
        let _device = device_task.await.unwrap();

        // Assert
        assert_eq!(transport.kind(), TransportKind::BrowserSerial);
        assert!(matches!(rx.recv().await, Some(TransportEvent::Connected { ref address }) if address == "web-serial"));
    }
}
