//! Message header codec and the inbound dispatch table.
//!
//! Wire format (after serial framing has been removed):
//! ```text
//! [length:1][command:1][transaction_id:1][payload:N]
//! ```
//! `length` counts the header too and saturates at `0xff`, so large
//! framebuffer writes carry `0xff` and rely on the transport for their real
//! size.  Inbound payloads are cut at `length` when it is smaller than the
//! buffer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::command::Command;

/// Size of the message header in bytes.
pub const HEADER_LEN: usize = 3;

/// Errors produced while decoding inbound messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data for {what}: need at least {needed} bytes, got {available}")]
    InsufficientData {
        what: &'static str,
        needed: usize,
        available: usize,
    },
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The three-byte header that starts every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Declared total length, header included, saturated at 255.
    pub length: u8,
    /// Raw command byte; see [`Command`].
    pub command: u8,
    /// Transaction id echoed by the device; 0 for unsolicited input.
    pub transaction_id: u8,
}

impl MessageHeader {
    /// Returns the command if the code is known.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }
}

/// Encodes `command` with `transaction_id` and `payload` into one message.
///
/// # Examples
///
/// ```rust
/// use loupedeck_core::protocol::{codec::encode_message, Command};
///
/// let bytes = encode_message(Command::SetBrightness, 1, &[0x00]);
/// assert_eq!(bytes, vec![0x04, 0x09, 0x01, 0x00]);
/// ```
pub fn encode_message(command: Command, transaction_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push((HEADER_LEN + payload.len()).min(0xff) as u8);
    buf.push(command.code());
    buf.push(transaction_id);
    buf.extend_from_slice(payload);
    buf
}

/// Parses the header at the start of `buf`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if `buf` is shorter than
/// [`HEADER_LEN`].
pub fn decode_header(buf: &[u8]) -> Result<MessageHeader, ProtocolError> {
    require_len(buf, HEADER_LEN, "header")?;
    Ok(MessageHeader {
        length: buf[0],
        command: buf[1],
        transaction_id: buf[2],
    })
}

/// Returns the payload bytes of `buf` as bounded by the header length.
pub fn payload_of<'a>(buf: &'a [u8], header: &MessageHeader) -> &'a [u8] {
    let end = (header.length as usize).min(buf.len());
    if end <= HEADER_LEN {
        &[]
    } else {
        &buf[HEADER_LEN..end]
    }
}

// ── Inbound dispatch ──────────────────────────────────────────────────────────

/// Which touch surface produced a touch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchSurface {
    /// The main panel (side strips and key grid).
    Main,
    /// The round screen inside the CT's wheel.
    Knob,
}

/// Firmware version reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Decoded body of an inbound message.
///
/// Control ids are still raw bytes here; mapping them to named controls
/// depends on the device profile and happens in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Liveness tick; carries no event.
    Tick,
    /// A button or knob press changed state.
    Button { raw_id: u8, pressed: bool },
    /// A knob turned by `delta` detents (negative is counter-clockwise).
    Rotate { raw_id: u8, delta: i8 },
    /// A touch report.  `ended` distinguishes touch-end from start/move.
    Touch {
        surface: TouchSurface,
        ended: bool,
        x: u16,
        y: u16,
        touch_id: u8,
    },
    /// Reply to [`Command::Serial`].
    Serial(String),
    /// Reply to [`Command::Version`].
    Version(FirmwareVersion),
    /// Anything without a decoding rule, passed through as the full message.
    Raw(Vec<u8>),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub header: MessageHeader,
    pub body: Inbound,
}

/// Decodes one complete inbound message.
///
/// Unknown command codes and acknowledgements are returned as
/// [`Inbound::Raw`] rather than as errors.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the header or a structured payload is too
/// short to decode.
pub fn decode_message(buf: &[u8]) -> Result<InboundMessage, ProtocolError> {
    let header = decode_header(buf)?;
    let payload = payload_of(buf, &header);

    let body = match header.command() {
        Some(Command::ButtonPress) if payload.len() == 1 => Inbound::Tick,
        Some(Command::ButtonPress) => {
            require_len(payload, 2, "button")?;
            Inbound::Button {
                raw_id: payload[0],
                pressed: payload[1] == 0x00,
            }
        }
        Some(Command::KnobRotate) => {
            require_len(payload, 2, "knob rotation")?;
            Inbound::Rotate {
                raw_id: payload[0],
                delta: payload[1] as i8,
            }
        }
        Some(Command::Touch) => decode_touch(payload, TouchSurface::Main, false)?,
        Some(Command::TouchEnd) => decode_touch(payload, TouchSurface::Main, true)?,
        Some(Command::TouchCt) => decode_touch(payload, TouchSurface::Knob, false)?,
        Some(Command::TouchEndCt) => decode_touch(payload, TouchSurface::Knob, true)?,
        Some(Command::Serial) => Inbound::Serial(decode_serial(payload)),
        Some(Command::Version) => {
            require_len(payload, 3, "version")?;
            Inbound::Version(FirmwareVersion {
                major: payload[0],
                minor: payload[1],
                patch: payload[2],
            })
        }
        Some(_) => Inbound::Raw(buf.to_vec()),
        None => {
            debug!("passing through unknown command 0x{:02x}", header.command);
            Inbound::Raw(buf.to_vec())
        }
    };

    Ok(InboundMessage { header, body })
}

// ── Decode helpers ────────────────────────────────────────────────────────────

fn decode_touch(payload: &[u8], surface: TouchSurface, ended: bool) -> Result<Inbound, ProtocolError> {
    // [flags][x:2][y:2][id]
    require_len(payload, 6, "touch")?;
    Ok(Inbound::Touch {
        surface,
        ended,
        x: u16::from_be_bytes([payload[1], payload[2]]),
        y: u16::from_be_bytes([payload[3], payload[4]]),
        touch_id: payload[5],
    })
}

fn decode_serial(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

fn require_len(buf: &[u8], needed: usize, what: &'static str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::InsufficientData {
            what,
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
