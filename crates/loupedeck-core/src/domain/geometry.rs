//! Coordinate mapping between raw touch reports, key indices and framebuffer
//! rectangles.
//!
//! Two coordinate systems are involved:
//!
//! - **Panel coordinates**: what the touch controller reports.  On the Live the
//!   whole 480×270 panel is one surface; the left strip is `x < 60`, the key
//!   grid starts at `x = 60`, and the right strip starts at `x = 420`.
//! - **Framebuffer coordinates**: what a framebuffer write addresses.  Each
//!   display id owns a framebuffer; a display may be an offset window into a
//!   framebuffer it shares with other displays.

use serde::{Deserialize, Serialize};

use crate::domain::profile::{DeviceProfile, DisplaySpec, ProfileError, Screen, TouchLayout};
use crate::protocol::codec::TouchSurface;

/// Where a touch landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchTarget {
    pub screen: Screen,
    /// Key index when the touch is inside the key grid.
    pub key: Option<u8>,
}

/// A rectangle inside one display's framebuffer, ready to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub display: DisplaySpec,
    /// Framebuffer x; already includes the display offset.
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl DeviceProfile {
    /// Resolves a raw touch coordinate to a screen and, if applicable, a key.
    pub fn resolve_touch(&self, surface: TouchSurface, x: u16, y: u16) -> TouchTarget {
        if surface == TouchSurface::Knob {
            return TouchTarget {
                screen: Screen::Knob,
                key: None,
            };
        }

        if let TouchLayout::SidePanels {
            left_edge,
            right_edge,
        } = self.touch
        {
            if x < left_edge {
                return TouchTarget { screen: Screen::Left, key: None };
            }
            if x >= right_edge {
                return TouchTarget { screen: Screen::Right, key: None };
            }
        }

        TouchTarget {
            screen: self.grid.screen,
            key: self.key_at(x, y),
        }
    }

    /// Returns the key under panel coordinate `(x, y)`, if any.
    pub fn key_at(&self, x: u16, y: u16) -> Option<u8> {
        let grid = &self.grid;
        let dx = x.checked_sub(grid.touch_origin_x)?;
        let column = dx / grid.key_size;
        let row = y / grid.key_size;
        if column >= grid.columns as u16 || row >= grid.rows as u16 {
            return None;
        }
        Some((row * grid.columns as u16 + column) as u8)
    }

    /// Returns the centre of key `index` in panel coordinates.
    ///
    /// # Errors
    ///
    /// [`ProfileError::InvalidKey`] if `index` is outside the grid.
    pub fn key_center(&self, index: usize) -> Result<(u16, u16), ProfileError> {
        let (column, row) = self.key_cell(index)?;
        let size = self.grid.key_size;
        Ok((
            self.grid.touch_origin_x + column * size + size / 2,
            row * size + size / 2,
        ))
    }

    /// Returns the framebuffer rectangle of key `index`.
    ///
    /// # Errors
    ///
    /// [`ProfileError::InvalidKey`] for indices outside the grid and
    /// [`ProfileError::DisplayUnavailable`] if the grid display is missing.
    pub fn key_region(&self, index: usize) -> Result<Region, ProfileError> {
        let (column, row) = self.key_cell(index)?;
        let display = *self.display(self.grid.screen)?;
        let size = self.grid.key_size;
        Ok(Region {
            display,
            x: display.offset_x + self.grid.draw_origin_x + column * size,
            y: display.offset_y + row * size,
            width: size,
            height: size,
        })
    }

    /// Returns the framebuffer rectangle covering all of `screen`.
    ///
    /// # Errors
    ///
    /// [`ProfileError::DisplayUnavailable`] if the model lacks `screen`.
    pub fn screen_region(&self, screen: Screen) -> Result<Region, ProfileError> {
        let display = *self.display(screen)?;
        Ok(Region {
            display,
            x: display.offset_x,
            y: display.offset_y,
            width: display.width,
            height: display.height,
        })
    }

    fn key_cell(&self, index: usize) -> Result<(u16, u16), ProfileError> {
        if index >= self.grid.key_count() {
            return Err(ProfileError::InvalidKey(index));
        }
        let columns = self.grid.columns as usize;
        Ok(((index % columns) as u16, (index / columns) as u16))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
