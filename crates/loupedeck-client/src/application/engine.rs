//! DeviceEngine: the protocol engine behind every supported model.
//!
//! The engine owns one transport at a time and turns the raw message stream
//! into [`DeviceEvent`]s.  Outbound, it builds messages, assigns transaction
//! ids and, for tracked requests, hands back a [`PendingReply`] that
//! resolves when the device acknowledges the same id.
//!
//! # Tasks (for beginners)
//!
//! - A **pump task** per connection drains the transport's event channel,
//!   decodes messages, updates touch state and forwards events to the
//!   application.  It holds only a weak reference to the engine, so dropping
//!   every engine handle tears everything down.
//! - A **reconnect task** lives as long as the engine.  After an abnormal
//!   disconnect a timer asks it to reconnect to the last target.
//!
//! # Transactions
//!
//! Ids run from 1 to 255 and wrap; an id still awaiting its reply is skipped.
//! On disconnect pending transactions are left alone (their ids stay
//! reserved) and are dropped when the next connection comes up.  Operations
//! that wait for an acknowledgement give up after `reply_timeout_ms`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use loupedeck_core::domain::profile::{Feature, LOUPEDECK_LIVE};
use loupedeck_core::pixels::{draw_payload, framebuffer_payload};
use loupedeck_core::protocol::FirmwareVersion;
use loupedeck_core::{
    decode_message, encode_message, profile_for, Command, Control, DeviceProfile, Haptic,
    Inbound, PixelSource, ProfileError, Region, Rgb, Screen, SizeMismatch, TouchTarget,
    TransactionCounter,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::application::events::{DeviceEvent, Touch, TouchTracker};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::transport::{
    ConnectionDescriptor, DiscoveryError, Transport, TransportError, TransportEvent,
    TransportKind, TransportSet,
};

/// Errors returned by engine operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Unsupported product, missing display, bad key or missing feature.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    SizeMismatch(#[from] SizeMismatch),

    #[error("Not connected")]
    NotConnected,

    /// Every transaction id is waiting for a reply.
    #[error("all transaction ids are awaiting replies")]
    TransactionsExhausted,

    /// [`DeviceEngine::close`] ran while the attempt was in flight.
    #[error("connection attempt cancelled by close")]
    Cancelled,

    #[error("transaction {0} was abandoned by a disconnect")]
    TransactionAbandoned(u8),

    #[error("no reply to {command:?} within {timeout:?}")]
    ReplyTimeout { command: Command, timeout: Duration },

    #[error("unexpected reply to {command:?}: {reply:?}")]
    UnexpectedReply { command: Command, reply: Inbound },
}

// ── Public value types ────────────────────────────────────────────────────────

/// What [`DeviceEngine::connect`] should connect to.
#[derive(Debug, Clone, Default)]
pub enum ConnectTarget {
    /// The first device discovery finds (serial preferred).
    #[default]
    Auto,
    Path(String),
    Host(String),
    Descriptor(ConnectionDescriptor),
}

impl ConnectTarget {
    /// Explicit path, then explicit host, then discovery.
    pub fn from_config(config: &EngineConfig) -> Self {
        match (&config.path, &config.host) {
            (Some(path), _) => ConnectTarget::Path(path.clone()),
            (None, Some(host)) => ConnectTarget::Host(host.clone()),
            (None, None) => ConnectTarget::Auto,
        }
    }
}

/// Which discovery sources to skip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub ignore_serial: bool,
    pub ignore_websocket: bool,
}

impl From<&EngineConfig> for ListOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            ignore_serial: config.ignore_serial,
            ignore_websocket: config.ignore_websocket,
        }
    }
}

/// Describes an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub address: String,
    pub kind: TransportKind,
    /// Name of the device profile in use.
    pub profile: &'static str,
}

/// Identity reported by [`DeviceEngine::get_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub version: FirmwareVersion,
}

/// A rectangle to draw on one screen.
///
/// `x`/`y` are relative to the screen; width and height default to the full
/// screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRequest {
    pub screen: Screen,
    pub x: u16,
    pub y: u16,
    pub width: Option<u16>,
    pub height: Option<u16>,
    /// Overrides the configured `auto_refresh`.
    pub auto_refresh: Option<bool>,
}

impl DrawRequest {
    pub fn screen(screen: Screen) -> Self {
        Self {
            screen,
            x: 0,
            y: 0,
            width: None,
            height: None,
            auto_refresh: None,
        }
    }

    pub fn at(mut self, x: u16, y: u16) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn size(mut self, width: u16, height: u16) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Resolves the request against a profile into a framebuffer region.
    ///
    /// # Errors
    ///
    /// [`ProfileError::DisplayUnavailable`] if the model lacks the screen.
    pub fn region(&self, profile: &DeviceProfile) -> Result<Region, ProfileError> {
        let display = *profile.display(self.screen)?;
        Ok(Region {
            display,
            x: display.offset_x.saturating_add(self.x),
            y: display.offset_y.saturating_add(self.y),
            width: self.width.unwrap_or(display.width),
            height: self.height.unwrap_or(display.height),
        })
    }
}

/// A tracked request waiting for its acknowledgement.
#[derive(Debug)]
pub struct PendingReply {
    command: Command,
    transaction_id: u8,
    rx: oneshot::Receiver<Inbound>,
}

impl PendingReply {
    pub fn transaction_id(&self) -> u8 {
        self.transaction_id
    }

    /// Waits for the reply without a deadline.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransactionAbandoned`] if the entry was dropped after a
    /// reconnect.
    pub async fn wait(self) -> Result<Inbound, EngineError> {
        let id = self.transaction_id;
        self.rx
            .await
            .map_err(|_| EngineError::TransactionAbandoned(id))
    }
}

// ── Engine state ──────────────────────────────────────────────────────────────

type ConnectAttempt = Shared<BoxFuture<'static, Result<ConnectionInfo, EngineError>>>;

struct Connection {
    transport: Arc<dyn Transport>,
    generation: u64,
    info: ConnectionInfo,
    pump: JoinHandle<()>,
}

struct EngineState {
    profile: &'static DeviceProfile,
    connection: Option<Connection>,
    touches: TouchTracker,
    /// Remembered for reconnects.
    target: ConnectTarget,
    attempt: Option<(u64, ConnectAttempt)>,
    attempts: u64,
    generation: u64,
    /// Bumped by `close`; attempts and reconnects from an older session are dropped.
    session: u64,
    reconnect: Option<JoinHandle<()>>,
}

impl EngineState {
    /// Maps a decoded message to application events.
    fn translate(&mut self, body: &Inbound) -> Vec<DeviceEvent> {
        let profile = self.profile;
        match *body {
            Inbound::Button { raw_id, pressed } => {
                let id = profile.control(raw_id);
                let mut events = vec![if pressed {
                    DeviceEvent::Down { id }
                } else {
                    DeviceEvent::Up { id }
                }];
                if profile.key_touch_emulation {
                    events.extend(self.emulate_touch(id, pressed));
                }
                events
            }
            Inbound::Rotate { raw_id, delta } => vec![DeviceEvent::Rotate {
                id: profile.control(raw_id),
                delta,
            }],
            Inbound::Touch {
                surface,
                ended,
                x,
                y,
                touch_id,
            } => {
                let target = profile.resolve_touch(surface, x, y);
                let touch = Touch { id: touch_id, x, y, target };
                vec![self.touches.observe(touch, ended)]
            }
            _ => Vec::new(),
        }
    }

    /// Key presses on models without a touch panel double as touches.
    fn emulate_touch(&mut self, control: Control, pressed: bool) -> Option<DeviceEvent> {
        let Control::Key(key) = control else {
            return None;
        };
        let (x, y) = self.profile.key_center(key as usize).ok()?;
        let touch = Touch {
            id: 0,
            x,
            y,
            target: TouchTarget {
                screen: self.profile.grid.screen,
                key: Some(key),
            },
        };
        Some(self.touches.observe(touch, !pressed))
    }
}

struct Inner {
    config: EngineConfig,
    transports: TransportSet,
    events: mpsc::Sender<DeviceEvent>,
    reconnect_requests: mpsc::UnboundedSender<u64>,
    counter: TransactionCounter,
    pending: Mutex<HashMap<u8, oneshot::Sender<Inbound>>>,
    state: Mutex<EngineState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u8, oneshot::Sender<Inbound>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_session(&self, session: u64) -> bool {
        self.state().session == session
    }

    fn ready_transport(&self) -> Option<Arc<dyn Transport>> {
        self.state()
            .connection
            .as_ref()
            .filter(|c| c.transport.is_ready())
            .map(|c| Arc::clone(&c.transport))
    }

    async fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }

    async fn write(
        &self,
        transport: &Arc<dyn Transport>,
        command: Command,
        id: u8,
        payload: &[u8],
    ) {
        let message = encode_message(command, id, payload);
        debug!("sending {command:?} txid {id} ({} payload bytes)", payload.len());
        if let Err(e) = transport.send(&message).await {
            warn!("failed to write {command:?}: {e}");
        }
    }

    /// Drops transactions left over from a previous connection.
    fn drop_abandoned(&self) {
        let stale: Vec<u8> = self.pending().drain().map(|(id, _)| id).collect();
        if !stale.is_empty() {
            debug!("dropping {} abandoned transaction(s): {stale:?}", stale.len());
        }
    }
}

// ── DeviceEngine ──────────────────────────────────────────────────────────────

/// Handle to a device engine.  Cheap to clone; all clones share one device.
#[derive(Clone)]
pub struct DeviceEngine {
    inner: Arc<Inner>,
}

impl DeviceEngine {
    /// Creates an engine with the built-in serial and network transports.
    ///
    /// Must be called inside a Tokio runtime.  Keep draining the returned
    /// receiver: once it is full the engine stops reading from the device,
    /// so replies queued behind an undelivered event wait too.
    pub fn new(config: EngineConfig) -> (Self, mpsc::Receiver<DeviceEvent>) {
        Self::with_transports(config, TransportSet::native())
    }

    /// Creates an engine with custom discovery sources and transport factory.
    pub fn with_transports(
        config: EngineConfig,
        transports: TransportSet,
    ) -> (Self, mpsc::Receiver<DeviceEvent>) {
        let (events, rx) = mpsc::channel(config.event_capacity.max(1));
        let (reconnect_requests, requests) = mpsc::unbounded_channel();
        let target = ConnectTarget::from_config(&config);

        let inner = Arc::new(Inner {
            config,
            transports,
            events,
            reconnect_requests,
            counter: TransactionCounter::new(),
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(EngineState {
                profile: &LOUPEDECK_LIVE,
                connection: None,
                touches: TouchTracker::new(),
                target,
                attempt: None,
                attempts: 0,
                generation: 0,
                session: 0,
                reconnect: None,
            }),
        });
        tokio::spawn(Self::reconnect_loop(Arc::downgrade(&inner), requests));

        (Self { inner }, rx)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The profile of the connected (or last connected) model.
    pub fn profile(&self) -> &'static DeviceProfile {
        self.inner.state().profile
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready_transport().is_some()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.state().connection.as_ref().map(|c| c.info.clone())
    }

    // ── Discovery and connection ──────────────────────────────────────────────

    /// Lists reachable devices, serial first, then network, then host ports.
    pub async fn list(&self, options: ListOptions) -> Vec<ConnectionDescriptor> {
        Self::discover(&self.inner, options).await
    }

    async fn discover(inner: &Inner, options: ListOptions) -> Vec<ConnectionDescriptor> {
        let mut sources: Vec<_> = inner
            .transports
            .discoverers
            .iter()
            .filter(|(kind, _)| match kind {
                TransportKind::Serial | TransportKind::BrowserSerial => !options.ignore_serial,
                TransportKind::WebSocket => !options.ignore_websocket,
            })
            .collect();
        sources.sort_by_key(|(kind, _)| *kind);

        let results = join_all(sources.iter().map(|(_, source)| source.discover())).await;
        let found: Vec<ConnectionDescriptor> = results.into_iter().flatten().collect();
        debug!("discovery found {} device(s)", found.len());
        found
    }

    /// Connects to `target` and resolves once the link is ready.
    ///
    /// Concurrent calls share one attempt.  Calling it while connected
    /// returns the current connection.  On failure a disconnect event is
    /// emitted and, if enabled, a reconnect is scheduled.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Discovery`] when `Auto` finds nothing.
    /// - [`EngineError::Profile`] for unsupported products.
    /// - [`EngineError::Transport`] when the link cannot be opened.
    pub async fn connect(&self, target: ConnectTarget) -> Result<ConnectionInfo, EngineError> {
        let attempt = {
            let mut state = self.inner.state();
            if let Some(connection) = &state.connection {
                if connection.transport.is_ready() {
                    return Ok(connection.info.clone());
                }
            }
            let joined = state.attempt.as_ref().map(|(_, attempt)| attempt.clone());
            match joined {
                Some(attempt) => attempt,
                None => {
                    state.attempts += 1;
                    let id = state.attempts;
                    let session = state.session;
                    state.target = target.clone();
                    let attempt = Self::run_attempt(Arc::clone(&self.inner), id, session, target)
                        .boxed()
                        .shared();
                    state.attempt = Some((id, attempt.clone()));
                    attempt
                }
            }
        };
        attempt.await
    }

    async fn run_attempt(
        inner: Arc<Inner>,
        id: u64,
        session: u64,
        target: ConnectTarget,
    ) -> Result<ConnectionInfo, EngineError> {
        let result = Self::establish(&inner, session, target).await;
        {
            let mut state = inner.state();
            if state.attempt.as_ref().is_some_and(|(current, _)| *current == id) {
                state.attempt = None;
            }
        }
        match &result {
            Ok(_) => {}
            Err(EngineError::Cancelled) => {
                info!("connection attempt cancelled");
                inner.emit(DeviceEvent::Disconnect { error: None }).await;
            }
            Err(e) => Self::handle_disconnect(&inner, None, Some(e.clone())).await,
        }
        result
    }

    async fn establish(
        inner: &Arc<Inner>,
        session: u64,
        target: ConnectTarget,
    ) -> Result<ConnectionInfo, EngineError> {
        let descriptor = match target {
            ConnectTarget::Auto => Self::discover(inner, ListOptions::from(&inner.config))
                .await
                .into_iter()
                .next()
                .ok_or(DiscoveryError::NoDevicesFound)?,
            ConnectTarget::Path(path) => ConnectionDescriptor::serial(path),
            ConnectTarget::Host(host) => ConnectionDescriptor::websocket(host),
            ConnectTarget::Descriptor(descriptor) => descriptor,
        };
        let profile = match descriptor.product_id {
            Some(product_id) => profile_for(descriptor.vendor_id, product_id)?,
            None => inner.state().profile,
        };

        let transport = inner
            .transports
            .factory
            .open(&descriptor, inner.config.transport_options());
        let info = ConnectionInfo {
            address: descriptor.address(),
            kind: descriptor.kind,
            profile: profile.name,
        };
        debug!("connecting to {} as {}", info.address, profile.name);

        let (tx, rx) = mpsc::channel(inner.config.event_capacity.max(1));
        let generation = {
            let mut state = inner.state();
            if state.session != session {
                return Err(EngineError::Cancelled);
            }
            state.generation += 1;
            state.profile = profile;
            state.touches.clear();
            let generation = state.generation;
            let pump = tokio::spawn(Self::pump(Arc::downgrade(inner), generation, rx));
            let previous = state.connection.replace(Connection {
                transport: Arc::clone(&transport),
                generation,
                info: info.clone(),
                pump,
            });
            if let Some(previous) = previous {
                previous.pump.abort();
            }
            generation
        };

        let connected = transport.connect(tx).await;
        if connected.is_err() || !inner.in_session(session) {
            let abandoned = {
                let mut state = inner.state();
                if state.connection.as_ref().is_some_and(|c| c.generation == generation) {
                    state.connection.take()
                } else {
                    None
                }
            };
            if let Some(connection) = abandoned {
                connection.pump.abort();
                let _ = connection.pump.await;
            }
            return match connected {
                Err(e) if inner.in_session(session) => Err(e.into()),
                _ => {
                    debug!("closing {} opened after close()", info.address);
                    transport.close().await;
                    Err(EngineError::Cancelled)
                }
            };
        }

        inner.drop_abandoned();
        info!("connected to {} ({})", info.address, profile.name);
        Ok(info)
    }

    async fn reconnect_loop(weak: Weak<Inner>, mut requests: mpsc::UnboundedReceiver<u64>) {
        while let Some(session) = requests.recv().await {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.in_session(session) {
                debug!("skipping reconnect requested before close()");
                continue;
            }
            let engine = DeviceEngine { inner };
            let target = engine.inner.state().target.clone();
            debug!("reconnecting to {target:?}");
            if let Err(e) = engine.connect(target).await {
                debug!("reconnect failed: {e}");
            }
        }
    }

    /// Drains one connection's transport events.
    async fn pump(weak: Weak<Inner>, generation: u64, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                TransportEvent::Connected { address } => {
                    inner.emit(DeviceEvent::Connect { address }).await;
                }
                TransportEvent::Message(bytes) => Self::handle_message(&inner, &bytes).await,
                TransportEvent::Disconnected { error } => {
                    let error = error.map(EngineError::from);
                    Self::handle_disconnect(&inner, Some(generation), error).await;
                    return;
                }
            }
        }
    }

    async fn handle_message(inner: &Inner, bytes: &[u8]) {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed message {bytes:02x?}: {e}");
                return;
            }
        };
        let txid = message.header.transaction_id;
        debug!("received {:?} txid {txid}", message.header.command());

        let events = inner.state().translate(&message.body);

        if txid != 0 {
            let waiter = inner.pending().remove(&txid);
            if let Some(waiter) = waiter {
                debug!("transaction {txid} resolved");
                let _ = waiter.send(message.body);
            }
        }

        for event in events {
            inner.emit(event).await;
        }
    }

    /// Tears down the current connection (if `generation` still matches),
    /// reports it and schedules a reconnect after abnormal disconnects.
    async fn handle_disconnect(
        inner: &Arc<Inner>,
        generation: Option<u64>,
        error: Option<EngineError>,
    ) {
        {
            let mut state = inner.state();
            if let Some(generation) = generation {
                if state.connection.as_ref().map(|c| c.generation) != Some(generation) {
                    debug!("ignoring disconnect of stale connection {generation}");
                    return;
                }
            }
            state.connection = None;
            state.touches.clear();
            if let Some(timer) = state.reconnect.take() {
                timer.abort();
            }
            if error.is_some() {
                if let Some(interval) = inner.config.reconnect_interval() {
                    let requests = inner.reconnect_requests.clone();
                    let session = state.session;
                    state.reconnect = Some(tokio::spawn(async move {
                        time::sleep(interval).await;
                        let _ = requests.send(session);
                    }));
                }
            }
        }

        match &error {
            Some(e) => warn!("disconnected: {e}"),
            None => info!("disconnected"),
        }
        inner
            .emit(DeviceEvent::Disconnect {
                error: error.map(|e| e.to_string()),
            })
            .await;
    }

    /// Closes the connection and cancels any pending reconnect.
    ///
    /// An in-flight connect attempt fails with [`EngineError::Cancelled`]
    /// and its link is closed as soon as it comes up.
    pub async fn close(&self) {
        let transport = {
            let mut state = self.inner.state();
            state.session += 1;
            state.attempt = None;
            if let Some(timer) = state.reconnect.take() {
                timer.abort();
            }
            state.connection.as_ref().map(|c| Arc::clone(&c.transport))
        };
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    // ── Messaging ─────────────────────────────────────────────────────────────

    /// Sends a tracked request.
    ///
    /// Returns `Ok(None)` without writing anything when not connected.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransactionsExhausted`] if every id is pending.
    pub async fn send(
        &self,
        command: Command,
        payload: &[u8],
    ) -> Result<Option<PendingReply>, EngineError> {
        let Some(transport) = self.inner.ready_transport() else {
            debug!("not connected; dropping {command:?}");
            return Ok(None);
        };
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.inner.pending();
            // Callers may drop a PendingReply without waiting on it.
            pending.retain(|_, waiter| !waiter.is_closed());
            let id = self
                .inner
                .counter
                .next_free(|id| pending.contains_key(&id))
                .ok_or(EngineError::TransactionsExhausted)?;
            pending.insert(id, tx);
            id
        };
        self.inner.write(&transport, command, id, payload).await;
        Ok(Some(PendingReply {
            command,
            transaction_id: id,
            rx,
        }))
    }

    /// Sends a message nobody waits for.  A no-op when not connected.
    pub async fn post(&self, command: Command, payload: &[u8]) {
        let Some(transport) = self.inner.ready_transport() else {
            debug!("not connected; dropping {command:?}");
            return;
        };
        let id = {
            let pending = self.inner.pending();
            let counter = &self.inner.counter;
            counter
                .next_free(|id| pending.get(&id).is_some_and(|waiter| !waiter.is_closed()))
                .unwrap_or_else(|| counter.next())
        };
        self.inner.write(&transport, command, id, payload).await;
    }

    /// Waits for `reply`, bounded by the configured reply timeout.
    async fn acknowledged(&self, reply: PendingReply) -> Result<Inbound, EngineError> {
        let (command, id) = (reply.command, reply.transaction_id);
        let timeout = self.inner.config.reply_timeout();
        match time::timeout(timeout, reply.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.pending().remove(&id);
                warn!("no reply to {command:?} (txid {id}) within {timeout:?}");
                Err(EngineError::ReplyTimeout { command, timeout })
            }
        }
    }

    /// Tracked send plus wait; `None` when not connected.
    async fn request(
        &self,
        command: Command,
        payload: &[u8],
    ) -> Result<Option<Inbound>, EngineError> {
        match self.send(command, payload).await? {
            Some(reply) => self.acknowledged(reply).await.map(Some),
            None => Ok(None),
        }
    }

    // ── Device operations ─────────────────────────────────────────────────────

    /// Reads the serial number and firmware version.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotConnected`] when no device is connected.
    pub async fn get_info(&self) -> Result<DeviceInfo, EngineError> {
        if !self.is_ready() {
            return Err(EngineError::NotConnected);
        }
        let serial = match self.request(Command::Serial, &[]).await? {
            Some(Inbound::Serial(serial)) => serial,
            Some(reply) => {
                return Err(EngineError::UnexpectedReply { command: Command::Serial, reply })
            }
            None => return Err(EngineError::NotConnected),
        };
        let version = match self.request(Command::Version, &[]).await? {
            Some(Inbound::Version(version)) => version,
            Some(reply) => {
                return Err(EngineError::UnexpectedReply { command: Command::Version, reply })
            }
            None => return Err(EngineError::NotConnected),
        };
        Ok(DeviceInfo { serial, version })
    }

    /// Sets the backlight; `value` is clamped to `0.0..=1.0` in tenths.
    pub async fn set_brightness(&self, value: f32) -> Result<(), EngineError> {
        let level = (value * 10.0).round().clamp(0.0, 10.0) as u8;
        self.request(Command::SetBrightness, &[level]).await?;
        Ok(())
    }

    /// Sets the LED colour of a round button.
    ///
    /// # Errors
    ///
    /// [`ProfileError::FeatureUnavailable`] on models without button LEDs and
    /// [`ProfileError::InvalidButton`] for controls the model lacks.
    pub async fn set_button_color(&self, control: Control, color: Rgb) -> Result<(), EngineError> {
        let profile = self.profile();
        profile.require(Feature::ButtonColor)?;
        let raw_id = profile.raw_id(control)?;
        self.request(Command::SetColor, &[raw_id, color.r, color.g, color.b])
            .await?;
        Ok(())
    }

    /// Plays a haptic pattern.
    ///
    /// # Errors
    ///
    /// [`ProfileError::FeatureUnavailable`] on models without a motor.
    pub async fn vibrate(&self, pattern: Haptic) -> Result<(), EngineError> {
        self.profile().require(Feature::Vibration)?;
        self.request(Command::SetVibration, &[pattern.code()]).await?;
        Ok(())
    }

    /// Presents the framebuffer of `screen`.
    pub async fn refresh(&self, screen: Screen) -> Result<(), EngineError> {
        let display = *self.profile().display(screen)?;
        self.post(Command::Draw, &display.id_bytes()).await;
        Ok(())
    }

    /// Writes a 5-6-5 buffer into the rectangle described by `request`.
    ///
    /// # Errors
    ///
    /// [`EngineError::SizeMismatch`] if `pixels` does not fill the rectangle.
    pub async fn draw_buffer(
        &self,
        request: DrawRequest,
        pixels: &[u8],
    ) -> Result<(), EngineError> {
        let region = request.region(self.profile())?;
        let refresh = request.auto_refresh.unwrap_or(self.inner.config.auto_refresh);
        self.write_region(region, pixels, refresh).await
    }

    /// Fills key `index` with a 5-6-5 buffer.
    pub async fn draw_key(&self, index: usize, pixels: &[u8]) -> Result<(), EngineError> {
        let region = self.profile().key_region(index)?;
        self.write_region(region, pixels, self.inner.config.auto_refresh)
            .await
    }

    /// Fills a whole screen with a 5-6-5 buffer.
    pub async fn draw_screen(&self, screen: Screen, pixels: &[u8]) -> Result<(), EngineError> {
        let region = self.profile().screen_region(screen)?;
        self.write_region(region, pixels, self.inner.config.auto_refresh)
            .await
    }

    /// Renders key `index` through a drawing context.
    pub async fn draw_key_with(
        &self,
        index: usize,
        source: &(dyn PixelSource + Sync),
    ) -> Result<(), EngineError> {
        let region = self.profile().key_region(index)?;
        let pixels = source.render(region.width, region.height);
        self.write_region(region, &pixels, self.inner.config.auto_refresh)
            .await
    }

    /// Renders a whole screen through a drawing context.
    pub async fn draw_screen_with(
        &self,
        screen: Screen,
        source: &(dyn PixelSource + Sync),
    ) -> Result<(), EngineError> {
        let region = self.profile().screen_region(screen)?;
        let pixels = source.render(region.width, region.height);
        self.write_region(region, &pixels, self.inner.config.auto_refresh)
            .await
    }

    async fn write_region(
        &self,
        region: Region,
        pixels: &[u8],
        refresh: bool,
    ) -> Result<(), EngineError> {
        let payload = framebuffer_payload(&region, pixels)?;
        let Some(reply) = self.send(Command::Framebuffer, &payload).await? else {
            return Ok(());
        };
        self.acknowledged(reply).await?;
        if refresh {
            self.post(Command::Draw, &draw_payload(&region)).await;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use loupedeck_core::domain::profile::{
        FunctionButton, Knob, LOUPEDECK_VENDOR_ID, RAZER_VENDOR_ID,
    };
    use loupedeck_core::pixels::{expected_len, SolidFill};

    use crate::application::events::TouchUpdate;
    use crate::infrastructure::transport::{
        Discovery, EventSender, MockDiscovery, TransportFactory, TransportOptions,
    };

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Records every outbound message; optionally acknowledges like a device.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        ready: AtomicBool,
        events: Mutex<Option<EventSender>>,
        auto_ack: bool,
        /// Reply payload per command code.
        replies: HashMap<u8, Vec<u8>>,
        /// Handshake time before the link turns ready.
        connect_delay: Option<Duration>,
        connects: AtomicUsize,
    }

    impl RecordingTransport {
        fn acking() -> Self {
            Self { auto_ack: true, ..Self::default() }
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        fn sender(&self) -> EventSender {
            self.events.lock().unwrap().clone().expect("connected")
        }

        async fn inject(&self, bytes: &[u8]) {
            self.sender().send(TransportEvent::Message(bytes.to_vec())).await.unwrap();
        }

        async fn drop_link(&self, error: Option<TransportError>) {
            self.ready.store(false, Ordering::SeqCst);
            self.sender().send(TransportEvent::Disconnected { error }).await.unwrap();
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Serial
        }

        async fn connect(&self, events: EventSender) -> Result<(), TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.connect_delay {
                time::sleep(delay).await;
            }
            *self.events.lock().unwrap() = Some(events.clone());
            self.ready.store(true, Ordering::SeqCst);
            events
                .send(TransportEvent::Connected { address: "test".to_string() })
                .await
                .unwrap();
            Ok(())
        }

        async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.to_vec());
            if self.auto_ack {
                let (command, id) = (message[1], message[2]);
                let payload = self.replies.get(&command).cloned().unwrap_or_default();
                let mut reply = vec![(3 + payload.len()) as u8, command, id];
                reply.extend(payload);
                self.sender().send(TransportEvent::Message(reply)).await.unwrap();
            }
            Ok(())
        }

        async fn close(&self) {
            if self.ready.swap(false, Ordering::SeqCst) {
                let _ = self.sender().send(TransportEvent::Disconnected { error: None }).await;
            }
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    struct StaticFactory(Arc<RecordingTransport>);

    impl TransportFactory for StaticFactory {
        fn open(&self, _: &ConnectionDescriptor, _: TransportOptions) -> Arc<dyn Transport> {
            Arc::clone(&self.0) as Arc<dyn Transport>
        }
    }

    fn descriptor(vendor_id: u16, product_id: u16) -> ConnectionDescriptor {
        ConnectionDescriptor {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..ConnectionDescriptor::serial("/dev/test")
        }
    }

    fn engine_with(
        transport: Arc<RecordingTransport>,
        discoverers: Vec<(TransportKind, Arc<dyn Discovery>)>,
        config: EngineConfig,
    ) -> (DeviceEngine, mpsc::Receiver<DeviceEvent>) {
        let set = TransportSet {
            discoverers,
            factory: Arc::new(StaticFactory(transport)),
        };
        DeviceEngine::with_transports(config, set)
    }

    /// Engine connected to a recording transport posing as `product_id`.
    async fn connected(
        transport: Arc<RecordingTransport>,
        vendor_id: u16,
        product_id: u16,
    ) -> (DeviceEngine, mpsc::Receiver<DeviceEvent>) {
        let (engine, mut events) = engine_with(transport, Vec::new(), EngineConfig::default());
        engine
            .connect(ConnectTarget::Descriptor(descriptor(vendor_id, product_id)))
            .await
            .expect("connect");
        assert!(matches!(events.recv().await, Some(DeviceEvent::Connect { .. })));
        (engine, events)
    }

    async fn live(
        transport: &Arc<RecordingTransport>,
    ) -> (DeviceEngine, mpsc::Receiver<DeviceEvent>) {
        connected(Arc::clone(transport), LOUPEDECK_VENDOR_ID, 0x0004).await
    }

    // ── Connection ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_connect_selects_profile_from_descriptor() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());

        // Act
        let (engine, _events) = connected(transport, LOUPEDECK_VENDOR_ID, 0x0003).await;

        // Assert
        assert!(engine.is_ready());
        assert_eq!(engine.profile().name, "Loupedeck CT");
        assert_eq!(engine.connection_info().unwrap().address, "/dev/test");
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_product() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let config = EngineConfig { reconnect_interval_ms: None, ..EngineConfig::default() };
        let (engine, mut events) = engine_with(transport, Vec::new(), config);

        // Act
        let err = engine
            .connect(ConnectTarget::Descriptor(descriptor(LOUPEDECK_VENDOR_ID, 0x0999)))
            .await
            .unwrap_err();

        // Assert
        assert_eq!(err.to_string(), "Device with product ID 0x0999 not yet supported");
        assert!(matches!(events.recv().await, Some(DeviceEvent::Disconnect { error: Some(_) })));
    }

    #[tokio::test]
    async fn test_auto_connect_prefers_serial_over_network() {
        // Arrange
        let mut serial = MockDiscovery::new();
        serial
            .expect_discover()
            .returning(|| vec![descriptor(LOUPEDECK_VENDOR_ID, 0x0006)]);
        let mut network = MockDiscovery::new();
        network.expect_discover().returning(|| {
            vec![ConnectionDescriptor {
                vendor_id: Some(LOUPEDECK_VENDOR_ID),
                product_id: Some(0x0004),
                ..ConnectionDescriptor::websocket("100.127.80.1")
            }]
        });
        let transport = Arc::new(RecordingTransport::default());
        let (engine, _events) = engine_with(
            transport,
            vec![
                (TransportKind::WebSocket, Arc::new(network) as Arc<dyn Discovery>),
                (TransportKind::Serial, Arc::new(serial)),
            ],
            EngineConfig::default(),
        );

        // Act
        let info = engine.connect(ConnectTarget::Auto).await.unwrap();

        // Assert
        assert_eq!(info.kind, TransportKind::Serial);
        assert_eq!(info.profile, "Loupedeck Live S");
    }

    #[tokio::test]
    async fn test_list_skips_ignored_sources() {
        // Arrange
        let mut serial = MockDiscovery::new();
        serial.expect_discover().never();
        let mut network = MockDiscovery::new();
        network
            .expect_discover()
            .times(1)
            .returning(|| vec![ConnectionDescriptor::websocket("100.127.80.1")]);
        let (engine, _events) = engine_with(
            Arc::new(RecordingTransport::default()),
            vec![
                (TransportKind::Serial, Arc::new(serial) as Arc<dyn Discovery>),
                (TransportKind::WebSocket, Arc::new(network)),
            ],
            EngineConfig::default(),
        );

        // Act
        let found = engine
            .list(ListOptions { ignore_serial: true, ignore_websocket: false })
            .await;

        // Assert
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, TransportKind::WebSocket);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_devices_retries_at_reconnect_interval() {
        // Arrange
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut discovery = MockDiscovery::new();
        discovery.expect_discover().returning(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });
        let config = EngineConfig { reconnect_interval_ms: Some(20), ..EngineConfig::default() };
        let (engine, mut events) = engine_with(
            Arc::new(RecordingTransport::default()),
            vec![(TransportKind::Serial, Arc::new(discovery) as Arc<dyn Discovery>)],
            config,
        );
        let started = time::Instant::now();

        // Act
        let err = engine.connect(ConnectTarget::Auto).await.unwrap_err();
        let first = events.recv().await;
        let second = events.recv().await;

        // Assert
        assert!(matches!(err, EngineError::Discovery(DiscoveryError::NoDevicesFound)));
        for event in [first, second] {
            assert_eq!(
                event,
                Some(DeviceEvent::Disconnect { error: Some("No devices found".to_string()) })
            );
        }
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(started.elapsed() < Duration::from_millis(45));
        engine.close().await;
    }

    #[tokio::test]
    async fn test_close_disconnects_without_error_or_reconnect() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, mut events) = live(&transport).await;

        // Act
        engine.close().await;

        // Assert
        assert_eq!(events.recv().await, Some(DeviceEvent::Disconnect { error: None }));
        assert!(!engine.is_ready());
        assert!(engine.inner.state().reconnect.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_share_one_attempt() {
        // Arrange
        let transport = Arc::new(RecordingTransport {
            connect_delay: Some(Duration::from_millis(20)),
            ..RecordingTransport::default()
        });
        let (engine, _events) = engine_with(Arc::clone(&transport), Vec::new(), EngineConfig::default());
        let target = || ConnectTarget::Descriptor(descriptor(LOUPEDECK_VENDOR_ID, 0x0004));

        // Act
        let (a, b, c) = tokio::join!(
            engine.connect(target()),
            engine.connect(target()),
            engine.connect(ConnectTarget::Auto)
        );

        // Assert
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(engine.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_handshake_cancels_attempt() {
        // Arrange
        let transport = Arc::new(RecordingTransport {
            connect_delay: Some(Duration::from_millis(50)),
            ..RecordingTransport::default()
        });
        let config = EngineConfig { reconnect_interval_ms: Some(20), ..EngineConfig::default() };
        let (engine, mut events) = engine_with(Arc::clone(&transport), Vec::new(), config);
        let connecting = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .connect(ConnectTarget::Descriptor(descriptor(LOUPEDECK_VENDOR_ID, 0x0004)))
                    .await
            })
        };
        time::sleep(Duration::from_millis(10)).await;

        // Act
        engine.close().await;
        let result = connecting.await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        // Assert
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(!engine.is_ready());
        assert!(!transport.is_ready());
        assert!(engine.connection_info().is_none());
        assert!(engine.inner.state().reconnect.is_none());
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.last(), Some(&DeviceEvent::Disconnect { error: None }));
    }

    #[tokio::test]
    async fn test_transport_error_schedules_reconnect() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, mut events) = live(&transport).await;

        // Act
        transport.drop_link(Some(TransportError::Timeout)).await;

        // Assert
        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::Disconnect {
                error: Some("Connection timeout - was the device disconnected?".to_string())
            })
        );
        assert!(engine.inner.state().reconnect.is_some());
        engine.close().await;
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_button_and_knob_events_use_profile_names() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (_engine, mut events) = live(&transport).await;

        // Act
        transport.inject(&[0x05, 0x00, 0x00, 0x07, 0x00]).await;
        transport.inject(&[0x05, 0x00, 0x00, 0x07, 0x01]).await;
        transport.inject(&[0x05, 0x01, 0x00, 0x01, 0xff]).await;
        transport.inject(&[0x04, 0x00, 0x00, 0xf9]).await;

        // Assert
        assert_eq!(events.recv().await, Some(DeviceEvent::Down { id: Control::Button(0) }));
        assert_eq!(events.recv().await, Some(DeviceEvent::Up { id: Control::Button(0) }));
        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::Rotate { id: Control::Knob(Knob::TopLeft), delta: -1 })
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ct_function_button_press() {
        let transport = Arc::new(RecordingTransport::default());
        let (_engine, mut events) = connected(Arc::clone(&transport), LOUPEDECK_VENDOR_ID, 0x0003).await;

        transport.inject(&[0x05, 0x00, 0x00, 0x0f, 0x00]).await;

        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::Down { id: Control::Function(FunctionButton::Home) })
        );
    }

    #[tokio::test]
    async fn test_touch_sequence_reports_live_touches() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (_engine, mut events) = live(&transport).await;

        // Act
        transport.inject(&[0x09, 0x4d, 0x00, 0x00, 0x00, 0x73, 0x00, 0xe2, 0x13]).await;
        transport.inject(&[0x09, 0x4d, 0x00, 0x00, 0x00, 0x22, 0x00, 0x8f, 0x14]).await;
        transport.inject(&[0x09, 0x6d, 0x00, 0x00, 0x00, 0x73, 0x00, 0xe2, 0x13]).await;

        // Assert
        let Some(DeviceEvent::TouchStart(first)) = events.recv().await else {
            panic!("expected touchstart");
        };
        assert_eq!(first.changed_touches[0].target, TouchTarget { screen: Screen::Center, key: Some(8) });
        let Some(DeviceEvent::TouchStart(second)) = events.recv().await else {
            panic!("expected second touchstart");
        };
        assert_eq!(second.touches.len(), 2);
        assert_eq!(second.changed_touches[0].target, TouchTarget { screen: Screen::Left, key: None });
        let Some(DeviceEvent::TouchEnd(end)) = events.recv().await else {
            panic!("expected touchend");
        };
        assert_eq!(end.touches.iter().map(|t| t.id).collect::<Vec<_>>(), vec![0x14]);
    }

    #[tokio::test]
    async fn test_razer_x_key_press_synthesizes_touch() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (_engine, mut events) = connected(Arc::clone(&transport), RAZER_VENDOR_ID, 0x0d09).await;

        // Act
        transport.inject(&[0x05, 0x00, 0x00, 0x29, 0x00]).await;
        transport.inject(&[0x05, 0x00, 0x00, 0x29, 0x01]).await;

        // Assert
        let touch = Touch {
            id: 0,
            x: 432,
            y: 240,
            target: TouchTarget { screen: Screen::Center, key: Some(14) },
        };
        assert_eq!(events.recv().await, Some(DeviceEvent::Down { id: Control::Key(14) }));
        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::TouchStart(TouchUpdate { touches: vec![touch], changed_touches: vec![touch] }))
        );
        assert_eq!(events.recv().await, Some(DeviceEvent::Up { id: Control::Key(14) }));
        assert_eq!(
            events.recv().await,
            Some(DeviceEvent::TouchEnd(TouchUpdate { touches: vec![], changed_touches: vec![touch] }))
        );
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let (_engine, mut events) = live(&transport).await;

        transport.inject(&[0x04, 0x01, 0x00, 0x01]).await;
        transport.inject(&[0x05, 0x00, 0x00, 0x08, 0x00]).await;

        assert_eq!(events.recv().await, Some(DeviceEvent::Down { id: Control::Button(1) }));
    }

    // ── Outbound messages ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_while_disconnected_writes_nothing() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, _events) = engine_with(Arc::clone(&transport), Vec::new(), EngineConfig::default());

        // Act
        let reply = engine.send(Command::SetBrightness, &[5]).await.unwrap();
        engine.set_brightness(0.5).await.unwrap();

        // Assert
        assert!(reply.is_none());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_ids_wrap_and_skip_zero() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, _events) = live(&transport).await;

        // Act
        for _ in 0..256 {
            engine.post(Command::Draw, &[0x00, 0x4d]).await;
        }

        // Assert
        let ids: Vec<u8> = transport.sent().iter().map(|m| m[2]).collect();
        assert!(ids.iter().all(|id| *id != 0));
        assert_eq!(ids[0], 1);
        assert_eq!(ids[254], 255);
        assert_eq!(ids[255], 1);
    }

    #[tokio::test]
    async fn test_pending_ids_are_skipped_until_exhausted() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, _events) = live(&transport).await;
        let mut replies = Vec::new();

        // Act
        for _ in 0..255 {
            replies.push(engine.send(Command::Serial, &[]).await.unwrap().unwrap());
        }
        let overflow = engine.send(Command::Serial, &[]).await;

        // Assert
        assert!(matches!(overflow, Err(EngineError::TransactionsExhausted)));
        let mut ids: Vec<u8> = replies.iter().map(PendingReply::transaction_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 255);
    }

    #[tokio::test]
    async fn test_dropped_replies_release_their_ids() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, _events) = live(&transport).await;
        for _ in 0..255 {
            let reply = engine.send(Command::Serial, &[]).await.unwrap();
            drop(reply);
        }

        // Act
        let reply = engine.send(Command::SetBrightness, &[10]).await;

        // Assert
        let reply = reply.expect("an id is free").expect("connected");
        assert_eq!(reply.transaction_id(), 1);
        assert_eq!(engine.inner.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_brightness_acknowledged_while_events_are_undrained() {
        // Arrange
        let transport = Arc::new(RecordingTransport::acking());
        let config = EngineConfig { event_capacity: 1, ..EngineConfig::default() };
        let (engine, _events) = engine_with(Arc::clone(&transport), Vec::new(), config);
        engine
            .connect(ConnectTarget::Descriptor(descriptor(LOUPEDECK_VENDOR_ID, 0x0004)))
            .await
            .unwrap();

        // Act
        let result = time::timeout(Duration::from_secs(1), engine.set_brightness(0.5)).await;

        // Assert
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_get_info_sends_serial_then_version() {
        // Arrange
        let mut device = RecordingTransport::acking();
        device.replies.insert(0x03, b"LDD2101012345678".to_vec());
        device.replies.insert(0x07, vec![0x01, 0x05, 0x20]);
        let transport = Arc::new(device);
        let (engine, _events) = live(&transport).await;

        // Act
        let info = engine.get_info().await.unwrap();

        // Assert
        assert_eq!(transport.sent(), vec![vec![0x03, 0x03, 0x01], vec![0x03, 0x07, 0x02]]);
        assert_eq!(info.serial, "LDD2101012345678");
        assert_eq!(info.version.to_string(), "1.5.32");
    }

    #[tokio::test]
    async fn test_get_info_requires_connection() {
        let (engine, _events) =
            engine_with(Arc::new(RecordingTransport::default()), Vec::new(), EngineConfig::default());

        let err = engine.get_info().await.unwrap_err();

        assert_eq!(err.to_string(), "Not connected");
    }

    #[tokio::test]
    async fn test_set_brightness_bytes() {
        // Arrange
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;

        // Act
        engine.set_brightness(0.0).await.unwrap();
        engine.set_brightness(1.0).await.unwrap();
        engine.set_brightness(7.5).await.unwrap();

        // Assert
        assert_eq!(
            transport.sent(),
            vec![
                vec![0x04, 0x09, 0x01, 0x00],
                vec![0x04, 0x09, 0x02, 0x0a],
                vec![0x04, 0x09, 0x03, 0x0a],
            ]
        );
    }

    #[tokio::test]
    async fn test_set_button_color_uses_raw_id() {
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;

        engine.set_button_color(Control::Button(4), Rgb::new(255, 0, 0)).await.unwrap();

        assert_eq!(transport.sent(), vec![vec![0x07, 0x02, 0x01, 0x0b, 0xff, 0x00, 0x00]]);
    }

    #[tokio::test]
    async fn test_set_button_color_rejects_unknown_button() {
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;

        let err = engine
            .set_button_color(Control::Function(FunctionButton::Home), Rgb::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Profile(ProfileError::InvalidButton(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_vibrate_default_pattern() {
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;

        engine.vibrate(Haptic::default()).await.unwrap();

        assert_eq!(transport.sent(), vec![vec![0x04, 0x1b, 0x01, 0x01]]);
    }

    #[tokio::test]
    async fn test_razer_x_lacks_vibration_and_colors() {
        // Arrange
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = connected(Arc::clone(&transport), RAZER_VENDOR_ID, 0x0d09).await;

        // Act
        let vibrate = engine.vibrate(Haptic::Long).await.unwrap_err();
        let color = engine.set_button_color(Control::Key(0), Rgb::default()).await.unwrap_err();

        // Assert
        assert_eq!(vibrate.to_string(), "Vibration not available on this device");
        assert_eq!(color.to_string(), "Setting key color not available on this device");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_draw_key_writes_framebuffer_then_refreshes() {
        // Arrange
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;
        let pixels = vec![0u8; expected_len(90, 90)];

        // Act
        engine.draw_key(6, &pixels).await.unwrap();

        // Assert
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0][..3], &[0xff, 0x10, 0x01]);
        assert_eq!(&sent[0][3..13], &[0x00, 0x4d, 0x00, 0xf0, 0x00, 0x5a, 0x00, 0x5a, 0x00, 0x5a]);
        assert_eq!(sent[1], vec![0x05, 0x0f, 0x02, 0x00, 0x4d]);
    }

    #[tokio::test]
    async fn test_draw_buffer_without_refresh() {
        // Arrange
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;
        let request = DrawRequest {
            auto_refresh: Some(false),
            ..DrawRequest::screen(Screen::Right).at(10, 20).size(4, 4)
        };

        // Act
        engine.draw_buffer(request, &[0u8; 32]).await.unwrap();

        // Assert
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][3..13], &[0x00, 0x4d, 0x01, 0xae, 0x00, 0x14, 0x00, 0x04, 0x00, 0x04]);
    }

    #[tokio::test]
    async fn test_draw_with_wrong_buffer_size_fails_before_writing() {
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = live(&transport).await;

        let err = engine.draw_screen(Screen::Left, &[0u8; 10]).await.unwrap_err();

        assert_eq!(err.to_string(), "Expected buffer length of 32400, got 10");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_draw_screen_with_renders_full_screen() {
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = connected(Arc::clone(&transport), LOUPEDECK_VENDOR_ID, 0x0006).await;

        engine
            .draw_screen_with(Screen::Center, &SolidFill(Rgb::new(255, 255, 255)))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].len(), 3 + 10 + expected_len(480, 270));
        assert_eq!(sent[1], vec![0x05, 0x0f, 0x02, 0x00, 0x4d]);
    }

    #[tokio::test]
    async fn test_draw_on_missing_screen_fails() {
        let transport = Arc::new(RecordingTransport::acking());
        let (engine, _events) = connected(Arc::clone(&transport), LOUPEDECK_VENDOR_ID, 0x0006).await;

        let err = engine.refresh(Screen::Left).await.unwrap_err();

        assert_eq!(err.to_string(), "display 'left' is not available on this device");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_request_times_out_and_frees_id() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, _events) = live(&transport).await;

        // Act
        let err = engine.vibrate(Haptic::Short).await.unwrap_err();

        // Assert
        assert!(matches!(err, EngineError::ReplyTimeout { command: Command::SetVibration, .. }));
        assert!(engine.inner.pending().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_abandons_old_transactions() {
        // Arrange
        let transport = Arc::new(RecordingTransport::default());
        let (engine, mut events) = live(&transport).await;
        let pending = engine.send(Command::Serial, &[]).await.unwrap().unwrap();
        transport.drop_link(None).await;
        assert_eq!(events.recv().await, Some(DeviceEvent::Disconnect { error: None }));

        // Act
        engine
            .connect(ConnectTarget::Descriptor(descriptor(LOUPEDECK_VENDOR_ID, 0x0004)))
            .await
            .unwrap();

        // Assert
        assert!(matches!(pending.wait().await, Err(EngineError::TransactionAbandoned(1))));
    }
}
