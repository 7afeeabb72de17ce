//! Data-driven device profiles.
//!
//! Every supported model is described by one immutable [`DeviceProfile`]
//! value: which displays it has and where they sit in the framebuffer, how the
//! key grid is laid out, which raw control ids map to which named controls,
//! and which optional features (haptics, button LEDs) exist.  The engine is
//! generic over this value; there is no per-model code path.
//!
//! [`profile_for`] is the registry: it maps a USB product id to its profile.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Loupedeck's USB vendor id.
pub const LOUPEDECK_VENDOR_ID: u16 = 0x2ec2;

/// Razer's USB vendor id.
pub const RAZER_VENDOR_ID: u16 = 0x1532;

/// Vendor ids accepted during serial discovery.
pub const KNOWN_VENDOR_IDS: [u16; 2] = [LOUPEDECK_VENDOR_ID, RAZER_VENDOR_ID];

/// Errors raised when an operation does not fit the connected model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
    /// No profile is registered for this product id.
    #[error("Device with product ID 0x{product_id:04x} not yet supported")]
    UnsupportedProduct { product_id: u16 },

    /// The model has no display with this name.
    #[error("display '{0}' is not available on this device")]
    DisplayUnavailable(Screen),

    /// The key index is outside the model's key grid.
    #[error("key {0} is not a valid key")]
    InvalidKey(usize),

    /// The control has no raw id on this model.
    #[error("Invalid button ID: {0}")]
    InvalidButton(Control),

    /// The model lacks the hardware for this feature.
    #[error("{0} not available on this device")]
    FeatureUnavailable(Feature),
}

// ── Displays ──────────────────────────────────────────────────────────────────

/// Logical screens a device may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    Left,
    Center,
    Right,
    /// Round screen inside the CT wheel.
    Knob,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Screen::Left => "left",
            Screen::Center => "center",
            Screen::Right => "right",
            Screen::Knob => "knob",
        };
        f.write_str(name)
    }
}

/// Order of the two bytes of each 5-6-5 pixel word on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// One addressable display region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySpec {
    pub screen: Screen,
    /// Two-byte id sent in framebuffer and draw commands.
    pub id: u16,
    pub width: u16,
    pub height: u16,
    /// Position of this display inside the framebuffer addressed by `id`.
    pub offset_x: u16,
    pub offset_y: u16,
    pub byte_order: ByteOrder,
}

impl DisplaySpec {
    /// Returns the display id as it appears on the wire.
    pub fn id_bytes(&self) -> [u8; 2] {
        self.id.to_be_bytes()
    }
}

/// Square key cells laid over one display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGrid {
    /// Display the keys are drawn on.
    pub screen: Screen,
    pub columns: u8,
    pub rows: u8,
    /// Edge length of one key in pixels.
    pub key_size: u16,
    /// X of the first column in touch (panel) coordinates.
    pub touch_origin_x: u16,
    /// X of the first column relative to the grid display.
    pub draw_origin_x: u16,
}

impl KeyGrid {
    pub fn key_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// How raw main-panel touch coordinates are split between screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchLayout {
    /// Side strips left of `left_edge` and at or right of `right_edge`.
    SidePanels { left_edge: u16, right_edge: u16 },
    /// The whole panel belongs to the grid display.
    Single,
}

// ── Controls ──────────────────────────────────────────────────────────────────

/// Rotary encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Knob {
    TopLeft,
    CenterLeft,
    BottomLeft,
    TopRight,
    CenterRight,
    BottomRight,
    /// The CT's large wheel.
    Wheel,
}

/// Labelled buttons found on the CT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionButton {
    Home,
    Undo,
    Keyboard,
    Enter,
    Save,
    FnLeft,
    FnRight,
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

/// A physical input control, resolved through the device profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Control {
    Knob(Knob),
    /// Round button below the screen, numbered from 0.
    Button(u8),
    /// Physical key with an LCD, numbered like the key grid.
    Key(u8),
    Function(FunctionButton),
    /// A raw id the profile does not know.
    Unknown(u8),
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Knob(knob) => {
                let name = match knob {
                    Knob::TopLeft => "knobTL",
                    Knob::CenterLeft => "knobCL",
                    Knob::BottomLeft => "knobBL",
                    Knob::TopRight => "knobTR",
                    Knob::CenterRight => "knobCR",
                    Knob::BottomRight => "knobBR",
                    Knob::Wheel => "knobCT",
                };
                f.write_str(name)
            }
            Control::Button(n) | Control::Key(n) => write!(f, "{n}"),
            Control::Function(button) => write!(f, "{button:?}"),
            Control::Unknown(raw) => write!(f, "0x{raw:02x}"),
        }
    }
}

/// Optional hardware features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Vibration,
    ButtonColor,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Vibration => f.write_str("Vibration"),
            Feature::ButtonColor => f.write_str("Setting key color"),
        }
    }
}

// ── Profile ───────────────────────────────────────────────────────────────────

/// Immutable description of one hardware model.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub displays: &'static [DisplaySpec],
    pub grid: KeyGrid,
    pub touch: TouchLayout,
    /// Raw control id to named control.
    pub controls: &'static [(u8, Control)],
    pub vibration: bool,
    pub button_colors: bool,
    /// Key presses also produce touch events (models without a touch panel).
    pub key_touch_emulation: bool,
}

impl DeviceProfile {
    /// Looks up a display by screen name.
    ///
    /// # Errors
    ///
    /// [`ProfileError::DisplayUnavailable`] if the model lacks that screen.
    pub fn display(&self, screen: Screen) -> Result<&DisplaySpec, ProfileError> {
        self.displays
            .iter()
            .find(|d| d.screen == screen)
            .ok_or(ProfileError::DisplayUnavailable(screen))
    }

    /// Maps a raw control id to a named control.
    pub fn control(&self, raw_id: u8) -> Control {
        self.controls
            .iter()
            .find(|(raw, _)| *raw == raw_id)
            .map(|(_, control)| *control)
            .unwrap_or(Control::Unknown(raw_id))
    }

    /// Maps a named control back to its raw id.
    ///
    /// # Errors
    ///
    /// [`ProfileError::InvalidButton`] if the control does not exist here.
    pub fn raw_id(&self, control: Control) -> Result<u8, ProfileError> {
        self.controls
            .iter()
            .find(|(_, c)| *c == control)
            .map(|(raw, _)| *raw)
            .ok_or(ProfileError::InvalidButton(control))
    }

    /// Fails if the model lacks `feature`.
    pub fn require(&self, feature: Feature) -> Result<(), ProfileError> {
        let present = match feature {
            Feature::Vibration => self.vibration,
            Feature::ButtonColor => self.button_colors,
        };
        if present {
            Ok(())
        } else {
            Err(ProfileError::FeatureUnavailable(feature))
        }
    }
}

/// Returns the profile registered for `product_id`.
///
/// When `vendor_id` is given it must match as well.
///
/// # Errors
///
/// [`ProfileError::UnsupportedProduct`] for unknown devices.
pub fn profile_for(
    vendor_id: Option<u16>,
    product_id: u16,
) -> Result<&'static DeviceProfile, ProfileError> {
    PROFILES
        .iter()
        .copied()
        .find(|p| p.product_id == product_id && vendor_id.map_or(true, |v| v == p.vendor_id))
        .ok_or(ProfileError::UnsupportedProduct { product_id })
}

// ── Model table ───────────────────────────────────────────────────────────────

/// Every registered profile.
pub static PROFILES: &[&DeviceProfile] = &[
    &LOUPEDECK_LIVE,
    &LOUPEDECK_CT,
    &LOUPEDECK_LIVE_S,
    &RAZER_STREAM_CONTROLLER,
    &RAZER_STREAM_CONTROLLER_X,
];

const fn display(
    screen: Screen,
    id: u16,
    width: u16,
    height: u16,
    offset_x: u16,
    byte_order: ByteOrder,
) -> DisplaySpec {
    DisplaySpec {
        screen,
        id,
        width,
        height,
        offset_x,
        offset_y: 0,
        byte_order,
    }
}

/// Displays sharing the single `M` framebuffer of the Live-style panel.
const SHARED_PANEL_DISPLAYS: &[DisplaySpec] = &[
    display(Screen::Left, 0x004d, 60, 270, 0, ByteOrder::Little),
    display(Screen::Center, 0x004d, 360, 270, 60, ByteOrder::Little),
    display(Screen::Right, 0x004d, 60, 270, 420, ByteOrder::Little),
];

const CT_DISPLAYS: &[DisplaySpec] = &[
    display(Screen::Left, 0x004c, 60, 270, 0, ByteOrder::Little),
    display(Screen::Center, 0x0041, 360, 270, 0, ByteOrder::Little),
    display(Screen::Right, 0x0052, 60, 270, 0, ByteOrder::Little),
    display(Screen::Knob, 0x0057, 240, 240, 0, ByteOrder::Big),
];

const LIVE_S_DISPLAYS: &[DisplaySpec] =
    &[display(Screen::Center, 0x004d, 480, 270, 0, ByteOrder::Little)];

const RAZER_X_DISPLAYS: &[DisplaySpec] =
    &[display(Screen::Center, 0x004d, 480, 288, 0, ByteOrder::Little)];

const SIDE_PANELS: TouchLayout = TouchLayout::SidePanels {
    left_edge: 60,
    right_edge: 420,
};

const PANEL_GRID: KeyGrid = KeyGrid {
    screen: Screen::Center,
    columns: 4,
    rows: 3,
    key_size: 90,
    touch_origin_x: 60,
    draw_origin_x: 0,
};

const KNOBS: [(u8, Control); 6] = [
    (0x01, Control::Knob(Knob::TopLeft)),
    (0x02, Control::Knob(Knob::CenterLeft)),
    (0x03, Control::Knob(Knob::BottomLeft)),
    (0x04, Control::Knob(Knob::TopRight)),
    (0x05, Control::Knob(Knob::CenterRight)),
    (0x06, Control::Knob(Knob::BottomRight)),
];

const ROUND_BUTTONS: [(u8, Control); 8] = [
    (0x07, Control::Button(0)),
    (0x08, Control::Button(1)),
    (0x09, Control::Button(2)),
    (0x0a, Control::Button(3)),
    (0x0b, Control::Button(4)),
    (0x0c, Control::Button(5)),
    (0x0d, Control::Button(6)),
    (0x0e, Control::Button(7)),
];

const LIVE_CONTROLS: &[(u8, Control)] = &[
    KNOBS[0], KNOBS[1], KNOBS[2], KNOBS[3], KNOBS[4], KNOBS[5],
    ROUND_BUTTONS[0], ROUND_BUTTONS[1], ROUND_BUTTONS[2], ROUND_BUTTONS[3],
    ROUND_BUTTONS[4], ROUND_BUTTONS[5], ROUND_BUTTONS[6], ROUND_BUTTONS[7],
];

const CT_CONTROLS: &[(u8, Control)] = &[
    (0x00, Control::Knob(Knob::Wheel)),
    KNOBS[0], KNOBS[1], KNOBS[2], KNOBS[3], KNOBS[4], KNOBS[5],
    ROUND_BUTTONS[0], ROUND_BUTTONS[1], ROUND_BUTTONS[2], ROUND_BUTTONS[3],
    ROUND_BUTTONS[4], ROUND_BUTTONS[5], ROUND_BUTTONS[6], ROUND_BUTTONS[7],
    (0x0f, Control::Function(FunctionButton::Home)),
    (0x10, Control::Function(FunctionButton::Undo)),
    (0x11, Control::Function(FunctionButton::Keyboard)),
    (0x12, Control::Function(FunctionButton::Enter)),
    (0x13, Control::Function(FunctionButton::Save)),
    (0x14, Control::Function(FunctionButton::FnLeft)),
    (0x15, Control::Function(FunctionButton::A)),
    (0x16, Control::Function(FunctionButton::C)),
    (0x17, Control::Function(FunctionButton::FnRight)),
    (0x18, Control::Function(FunctionButton::B)),
    (0x19, Control::Function(FunctionButton::D)),
    (0x1a, Control::Function(FunctionButton::E)),
    (0x1b, Control::Function(FunctionButton::F)),
    (0x1c, Control::Function(FunctionButton::G)),
    (0x1d, Control::Function(FunctionButton::H)),
];

const RAZER_X_CONTROLS: &[(u8, Control)] = &[
    (0x1b, Control::Key(0)),
    (0x1c, Control::Key(1)),
    (0x1d, Control::Key(2)),
    (0x1e, Control::Key(3)),
    (0x1f, Control::Key(4)),
    (0x20, Control::Key(5)),
    (0x21, Control::Key(6)),
    (0x22, Control::Key(7)),
    (0x23, Control::Key(8)),
    (0x24, Control::Key(9)),
    (0x25, Control::Key(10)),
    (0x26, Control::Key(11)),
    (0x27, Control::Key(12)),
    (0x28, Control::Key(13)),
    (0x29, Control::Key(14)),
];

pub static LOUPEDECK_LIVE: DeviceProfile = DeviceProfile {
    name: "Loupedeck Live",
    vendor_id: LOUPEDECK_VENDOR_ID,
    product_id: 0x0004,
    displays: SHARED_PANEL_DISPLAYS,
    grid: PANEL_GRID,
    touch: SIDE_PANELS,
    controls: LIVE_CONTROLS,
    vibration: true,
    button_colors: true,
    key_touch_emulation: false,
};

pub static LOUPEDECK_CT: DeviceProfile = DeviceProfile {
    name: "Loupedeck CT",
    vendor_id: LOUPEDECK_VENDOR_ID,
    product_id: 0x0003,
    displays: CT_DISPLAYS,
    grid: PANEL_GRID,
    touch: SIDE_PANELS,
    controls: CT_CONTROLS,
    vibration: true,
    button_colors: true,
    key_touch_emulation: false,
};

pub static LOUPEDECK_LIVE_S: DeviceProfile = DeviceProfile {
    name: "Loupedeck Live S",
    vendor_id: LOUPEDECK_VENDOR_ID,
    product_id: 0x0006,
    displays: LIVE_S_DISPLAYS,
    grid: KeyGrid {
        screen: Screen::Center,
        columns: 5,
        rows: 3,
        key_size: 90,
        touch_origin_x: 15,
        draw_origin_x: 15,
    },
    touch: TouchLayout::Single,
    controls: LIVE_CONTROLS,
    vibration: true,
    button_colors: true,
    key_touch_emulation: false,
};

pub static RAZER_STREAM_CONTROLLER: DeviceProfile = DeviceProfile {
    name: "Razer Stream Controller",
    vendor_id: RAZER_VENDOR_ID,
    product_id: 0x0d06,
    displays: SHARED_PANEL_DISPLAYS,
    grid: PANEL_GRID,
    touch: SIDE_PANELS,
    controls: LIVE_CONTROLS,
    vibration: true,
    button_colors: true,
    key_touch_emulation: false,
};

pub static RAZER_STREAM_CONTROLLER_X: DeviceProfile = DeviceProfile {
    name: "Razer Stream Controller X",
    vendor_id: RAZER_VENDOR_ID,
    product_id: 0x0d09,
    displays: RAZER_X_DISPLAYS,
    grid: KeyGrid {
        screen: Screen::Center,
        columns: 5,
        rows: 3,
        key_size: 96,
        touch_origin_x: 0,
        draw_origin_x: 0,
    },
    touch: TouchLayout::Single,
    controls: RAZER_X_CONTROLS,
    vibration: false,
    button_colors: false,
    key_touch_emulation: true,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
