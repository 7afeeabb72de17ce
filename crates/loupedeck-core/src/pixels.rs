//! Framebuffer payload construction.
//!
//! The engine never renders anything itself.  It receives finished 16-bit
//! 5-6-5 pixel buffers (little-endian words, as produced by common 2D
//! libraries in `RGB16_565` mode) either directly or from a [`PixelSource`],
//! checks their size, and wraps them into framebuffer-write payloads:
//!
//! ```text
//! [display_id:2][x:2][y:2][width:2][height:2][pixels:width*height*2]
//! ```
//! All header fields are big-endian.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::geometry::Region;
use crate::domain::profile::ByteOrder;

/// Bytes per 5-6-5 pixel.
pub const BYTES_PER_PIXEL: usize = 2;

/// The pixel buffer does not match the target rectangle.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Expected buffer length of {expected}, got {actual}")]
pub struct SizeMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// A drawing context able to render a region into a 5-6-5 buffer.
///
/// Implementations must return exactly `width * height * 2` bytes in
/// little-endian 5-6-5 words.
pub trait PixelSource {
    fn render(&self, width: u16, height: u16) -> Vec<u8>;
}

/// An RGB colour with 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Packs the colour into a 5-6-5 word.
    pub fn to_rgb565(self) -> u16 {
        ((self.r as u16 & 0xf8) << 8) | ((self.g as u16 & 0xfc) << 3) | (self.b as u16 >> 3)
    }
}

/// A [`PixelSource`] that fills the whole region with one colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolidFill(pub Rgb);

impl PixelSource for SolidFill {
    fn render(&self, width: u16, height: u16) -> Vec<u8> {
        let word = self.0.to_rgb565().to_le_bytes();
        let count = width as usize * height as usize;
        let mut buf = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            buf.extend_from_slice(&word);
        }
        buf
    }
}

/// Returns the buffer length required for a `width` × `height` rectangle.
pub fn expected_len(width: u16, height: u16) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Builds the framebuffer-write payload for `region`.
///
/// Pixel words are byte-swapped when the display expects big-endian words.
///
/// # Errors
///
/// [`SizeMismatch`] if `pixels` is not exactly `width * height * 2` bytes.
/// Nothing is truncated or padded.
pub fn framebuffer_payload(region: &Region, pixels: &[u8]) -> Result<Vec<u8>, SizeMismatch> {
    let expected = expected_len(region.width, region.height);
    if pixels.len() != expected {
        return Err(SizeMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    let mut payload = Vec::with_capacity(10 + pixels.len());
    payload.extend_from_slice(&region.display.id_bytes());
    payload.extend_from_slice(&region.x.to_be_bytes());
    payload.extend_from_slice(&region.y.to_be_bytes());
    payload.extend_from_slice(&region.width.to_be_bytes());
    payload.extend_from_slice(&region.height.to_be_bytes());

    let start = payload.len();
    payload.extend_from_slice(pixels);
    if region.display.byte_order == ByteOrder::Big {
        swap_words(&mut payload[start..]);
    }
    Ok(payload)
}

/// Builds the draw (present) payload for the display of `region`.
pub fn draw_payload(region: &Region) -> [u8; 2] {
    region.display.id_bytes()
}

/// Swaps the two bytes of every 16-bit word in place.
pub fn swap_words(buf: &mut [u8]) {
    for word in buf.chunks_exact_mut(2) {
        word.swap(0, 1);
    }
}
