//! # loupedeck-core
//!
//! Pure building blocks for talking to Loupedeck-family control surfaces
//! (Loupedeck Live, Live S, CT and the Razer Stream Controller family).
//!
//! This crate performs no I/O.  It contains:
//!
//! - **`protocol`**: the serial magic-byte framer, command codes, the
//!   three-byte header codec with its inbound dispatch table, and the
//!   transaction-id counter.
//! - **`domain`**: one immutable [`DeviceProfile`] per hardware model and the
//!   geometry that maps touch coordinates to keys and keys to framebuffer
//!   rectangles.
//! - **`pixels`**: validation and assembly of framebuffer-write payloads from
//!   caller-supplied 5-6-5 pixel buffers.
//!
//! The async engine and the transports live in `loupedeck-client`.

pub mod domain;
pub mod pixels;
pub mod protocol;

pub use domain::{
    profile_for, Control, DeviceProfile, ProfileError, Region, Screen, TouchTarget,
};
pub use pixels::{PixelSource, Rgb, SizeMismatch};
pub use protocol::{
    decode_message, encode_message, Command, FrameDecoder, Haptic, Inbound, InboundMessage,
    ProtocolError, TransactionCounter,
};
