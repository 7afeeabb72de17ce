//! Protocol module: serial framing, command codes, the message codec and
//! transaction-id allocation.

pub mod codec;
pub mod command;
pub mod framing;
pub mod transaction;

pub use codec::{
    decode_message, encode_message, FirmwareVersion, Inbound, InboundMessage, MessageHeader,
    ProtocolError, TouchSurface,
};
pub use command::{Command, Haptic};
pub use framing::{encode_frame, FrameDecoder, MAGIC_BYTE};
pub use transaction::TransactionCounter;
