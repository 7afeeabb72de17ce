//! loupedeck-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does loupedeck-client do? (for beginners)
//!
//! Loupedeck-family control surfaces (Live, Live S, CT, Razer Stream
//! Controller) speak a small binary protocol over USB serial, or over a
//! WebSocket for older network-attached units.  This crate:
//!
//! 1. Discovers attached devices on every supported transport.
//! 2. Opens a link (serial handshake plus magic-byte framing, or WebSocket).
//! 3. Decodes button, knob and touch input into [`DeviceEvent`]s named after
//!    the connected model's controls.
//! 4. Sends commands (brightness, button colours, haptics, framebuffer
//!    writes) and waits for the device to acknowledge them.
//! 5. Reconnects automatically after the device drops off.
//!
//! ```rust,no_run
//! use loupedeck_client::{ConnectTarget, DeviceEngine, EngineConfig};
//!
//! # async fn run() -> Result<(), loupedeck_client::EngineError> {
//! let (engine, mut events) = DeviceEngine::new(EngineConfig::default());
//! engine.connect(ConnectTarget::Auto).await?;
//! engine.set_brightness(0.5).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

/// Application layer: the protocol engine and its events.
pub mod application;

/// Infrastructure layer: transports, discovery and configuration.
pub mod infrastructure;

pub use application::engine::{
    ConnectTarget, ConnectionInfo, DeviceEngine, DeviceInfo, DrawRequest, EngineError,
    ListOptions, PendingReply,
};
pub use application::events::{DeviceEvent, Touch, TouchUpdate};
pub use infrastructure::config::{ConfigError, EngineConfig};
pub use infrastructure::transport::{
    ConnectionDescriptor, Transport, TransportError, TransportKind, TransportSet,
};
