//! Magic-byte framing used on the serial link.
//!
//! # Wire format
//!
//! Inbound, the device delimits each message with a single magic byte
//! followed by a one-byte length:
//!
//! ```text
//! [magic:1][len:1][body:len]
//! ```
//!
//! Outbound, every message is preceded by a small header telling the device
//! how many bytes follow:
//!
//! ```text
//! small (≤ 255 bytes):  [0x82][0x80 + len][0x00 × 4]
//! large (> 255 bytes):  [0x82][0xff][0x00 × 4][len:4 BE][0x00 × 4]
//! ```
//!
//! # Partial reads (for beginners)
//!
//! A serial port is a byte *stream*.  One `read()` may return half a message,
//! or three messages glued together.  [`FrameDecoder`] keeps whatever it has
//! not yet been able to emit in an internal residual buffer and only hands out
//! a frame once all of its bytes have arrived.  It never fails: bytes before
//! the first magic byte are skipped, and an undersized tail simply waits.

/// Magic byte marking the start of every inbound frame from the device.
pub const MAGIC_BYTE: u8 = 0x82;

/// Largest payload that fits the 6-byte small frame header.
pub const SMALL_FRAME_MAX: usize = 0xff;

/// Size of the header used for payloads up to [`SMALL_FRAME_MAX`] bytes.
pub const SMALL_HEADER_LEN: usize = 6;

/// Size of the extended header used for payloads above [`SMALL_FRAME_MAX`] bytes.
pub const LARGE_HEADER_LEN: usize = 14;

/// Offset of the big-endian length field inside the extended header.
const LARGE_LENGTH_OFFSET: usize = 6;

/// Incremental splitter for a magic-byte + length-prefixed byte stream.
///
/// Push raw chunks with [`push`](Self::push), then drain complete frames with
/// [`next_frame`](Self::next_frame).  When the stream ends, call
/// [`finish`](Self::finish) to recover whatever partial data remains.
///
/// # Examples
///
/// ```rust
/// use loupedeck_core::protocol::framing::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new(0x32);
/// let frames = decoder.decode(&[0x32, 0x01, 0x88, 0x32, 0x03, 0xff, 0x32, 0xff]);
/// assert_eq!(frames, vec![vec![0x88], vec![0xff, 0x32, 0xff]]);
/// ```
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    magic: u8,
    residual: Vec<u8>,
}

impl FrameDecoder {
    /// Creates a decoder that splits on `magic`.
    pub fn new(magic: u8) -> Self {
        Self {
            magic,
            residual: Vec::with_capacity(1024),
        }
    }

    /// Appends a chunk of raw bytes to the residual buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.residual.extend_from_slice(chunk);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    ///
    /// Zero-length frames are consumed silently.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let position = self.residual.iter().position(|&b| b == self.magic)?;

            // The length byte must be present before anything can be decided.
            if self.residual.len() < position + 2 {
                return None;
            }
            let length = self.residual[position + 1] as usize;
            let end = position + length + 2;
            if self.residual.len() < end {
                return None;
            }

            let frame = self.residual[position + 2..end].to_vec();
            self.residual.drain(..end);

            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    /// Pushes `chunk` and returns every frame that became complete.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.push(chunk);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Ends the stream, returning the residual bytes if there are any.
    ///
    /// The returned data is not necessarily a well-formed frame.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.residual.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.residual))
        }
    }

    /// Number of bytes currently held back waiting for more input.
    pub fn pending_len(&self) -> usize {
        self.residual.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAGIC_BYTE)
    }
}

/// Builds the frame header announcing a payload of `payload_len` bytes.
pub fn frame_header(payload_len: usize) -> Vec<u8> {
    if payload_len > SMALL_FRAME_MAX {
        let mut header = vec![0u8; LARGE_HEADER_LEN];
        header[0] = MAGIC_BYTE;
        header[1] = 0xff;
        header[LARGE_LENGTH_OFFSET..LARGE_LENGTH_OFFSET + 4]
            .copy_from_slice(&(payload_len as u32).to_be_bytes());
        header
    } else {
        let mut header = vec![0u8; SMALL_HEADER_LEN];
        header[0] = MAGIC_BYTE;
        // Firmware reads this byte modulo 256.
        header[1] = 0x80u8.wrapping_add(payload_len as u8);
        header
    }
}

/// Returns `payload` preceded by its serial frame header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = frame_header(payload.len());
    buf.extend_from_slice(payload);
    buf
}

// ── Tests ─────────────────────────────────────────────────────────────────────
