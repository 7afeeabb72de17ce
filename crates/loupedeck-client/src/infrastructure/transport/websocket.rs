//! WebSocket transport for network-attached (older firmware) devices.
//!
//! These devices expose a virtual network interface; the host side gets an
//! address in `100.127.x.2` and the device answers on `100.127.x.1`, port 80.
//! Every binary WebSocket message is one protocol message, so no extra
//! framing is needed.
//!
//! # Liveness
//!
//! The device sends ticks continuously.  A monitor task wakes every
//! `2 × connection_timeout`; if nothing arrived within the last
//! `connection_timeout` it tears the link down and reports
//! [`TransportError::Timeout`].

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use loupedeck_core::domain::profile::LOUPEDECK_VENDOR_ID;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::{
    ConnectionDescriptor, Discovery, Endpoint, EventSender, Transport, TransportError,
    TransportEvent, TransportKind, TransportOptions,
};

/// Default liveness window.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(3000);

/// Address prefix of the device's virtual network interface.
pub const DEVICE_SUBNET_PREFIX: &str = "100.127";

/// Product id assumed for network-attached devices (original Live).
pub const NETWORK_PRODUCT_ID: u16 = 0x0004;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Derives the device address from the host's interface addresses.
///
/// The first IPv4 address inside the device subnet wins; a trailing `.2` is
/// replaced by `.1`.
pub fn device_host_from<I>(addresses: I) -> Option<String>
where
    I: IntoIterator<Item = IpAddr>,
{
    addresses.into_iter().find_map(|addr| {
        let IpAddr::V4(v4) = addr else {
            return None;
        };
        let text = v4.to_string();
        if !text.starts_with(DEVICE_SUBNET_PREFIX) {
            return None;
        }
        Some(match text.strip_suffix(".2") {
            Some(prefix) => format!("{prefix}.1"),
            None => text,
        })
    })
}

#[cfg(unix)]
fn interface_addresses() -> Vec<IpAddr> {
    match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs
            .filter_map(|ifa| {
                let address = ifa.address?;
                let v4 = address.as_sockaddr_in()?;
                Some(IpAddr::V4(v4.ip()))
            })
            .collect(),
        Err(e) => {
            warn!("unable to list network interfaces: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(unix))]
fn interface_addresses() -> Vec<IpAddr> {
    Vec::new()
}

/// [`Discovery`] of network-attached devices through local interfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketDiscovery;

#[async_trait]
impl Discovery for WebSocketDiscovery {
    async fn discover(&self) -> Vec<ConnectionDescriptor> {
        let Some(host) = device_host_from(interface_addresses()) else {
            return Vec::new();
        };
        debug!("network device candidate at {host}");
        vec![ConnectionDescriptor {
            kind: TransportKind::WebSocket,
            endpoint: Endpoint::Host(host),
            vendor_id: Some(LOUPEDECK_VENDOR_ID),
            product_id: Some(NETWORK_PRODUCT_ID),
            serial_number: None,
        }]
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// State shared between the transport handle and its tasks.
struct Link {
    sink: Mutex<Option<WsSink>>,
    ready: AtomicBool,
    last_tick: StdMutex<Instant>,
    events: StdMutex<Option<EventSender>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Link {
    fn touch(&self) {
        *self.last_tick.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_tick.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }

    /// Marks the link down and reports it, once.
    async fn finish(&self, error: Option<TransportError>) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }
        match &error {
            Some(e) => warn!("websocket link lost: {e}"),
            None => info!("websocket link closed"),
        }
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Disconnected { error }).await;
        }
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}

/// Transport to a device reachable at `ws://<host>`.
pub struct WebSocketTransport {
    host: String,
    options: TransportOptions,
    link: Arc<Link>,
}

impl WebSocketTransport {
    pub fn new(host: impl Into<String>, options: TransportOptions) -> Self {
        Self {
            host: host.into(),
            options,
            link: Arc::new(Link {
                sink: Mutex::new(None),
                ready: AtomicBool::new(false),
                last_tick: StdMutex::new(Instant::now()),
                events: StdMutex::new(None),
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.host)
    }

    async fn read_loop(mut stream: SplitStream<WsStream>, events: EventSender, link: Arc<Link>) {
        let error = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    link.touch();
                    trace!("received {} bytes", data.len());
                    if events.send(TransportEvent::Message(data)).await.is_err() {
                        debug!("event receiver dropped; stopping reader");
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| f.code).unwrap_or(CloseCode::Normal);
                    break match code {
                        CloseCode::Normal => None,
                        other => Some(TransportError::WebSocket(format!(
                            "closed with code {}",
                            u16::from(other)
                        ))),
                    };
                }
                Some(Ok(_)) => link.touch(),
                Some(Err(e)) => break Some(TransportError::WebSocket(e.to_string())),
                None => break Some(TransportError::Closed),
            }
        };
        link.sink.lock().await.take();
        link.finish(error).await;
    }

    async fn monitor(link: Arc<Link>, timeout: Duration) {
        let mut ticker = time::interval_at(Instant::now() + timeout * 2, timeout * 2);
        loop {
            ticker.tick().await;
            if !link.ready.load(Ordering::SeqCst) {
                return;
            }
            if link.idle_for() > timeout {
                link.finish(Some(TransportError::Timeout)).await;
                // A send stalled on the socket may hold the sink; leave it to fail.
                let sink = link.sink.try_lock().ok().and_then(|mut guard| guard.take());
                // Aborts this task too, so nothing below may await.
                link.abort_tasks();
                if let Some(mut sink) = sink {
                    tokio::spawn(async move {
                        let _ = sink.close().await;
                    });
                }
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn connect(&self, events: EventSender) -> Result<(), TransportError> {
        let url = self.url();
        debug!("connecting to {url}");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let (sink, stream) = stream.split();

        *self.link.sink.lock().await = Some(sink);
        *self.link.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events.clone());
        self.link.touch();
        self.link.ready.store(true, Ordering::SeqCst);

        info!("websocket link up on {url}");
        let _ = events.send(TransportEvent::Connected { address: url }).await;

        let reader = tokio::spawn(Self::read_loop(stream, events, Arc::clone(&self.link)));
        let monitor = tokio::spawn(Self::monitor(
            Arc::clone(&self.link),
            self.options.connection_timeout,
        ));
        self.link
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([reader, monitor]);
        Ok(())
    }

    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotConnected);
        }
        let mut guard = self.link.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(WsMessage::Binary(message.to_vec()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&self) {
        if let Some(mut sink) = self.link.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.link.abort_tasks();
        self.link.finish(None).await;
    }

    fn is_ready(&self) -> bool {
        self.link.ready.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
