//! Command codes carried in the second byte of every message header.

use serde::{Deserialize, Serialize};

/// Every command code the engine sends or understands.
///
/// Codes in the same position are used in both directions: the device echoes
/// the command byte of a request in its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Button press/release; a one-byte body is a liveness tick instead.
    ButtonPress = 0x00,
    KnobRotate = 0x01,
    SetColor = 0x02,
    Serial = 0x03,
    Reset = 0x06,
    Version = 0x07,
    SetBrightness = 0x09,
    Mcu = 0x0d,
    /// Present the framebuffer of a display.
    Draw = 0x0f,
    /// Write pixels into the off-screen framebuffer of a display.
    Framebuffer = 0x10,
    SetVibration = 0x1b,
    Touch = 0x4d,
    /// Touch on the knob screen (CT only).
    TouchCt = 0x52,
    TouchEnd = 0x6d,
    TouchEndCt = 0x72,
}

impl Command {
    /// Returns the raw wire byte.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(Command::ButtonPress),
            0x01 => Ok(Command::KnobRotate),
            0x02 => Ok(Command::SetColor),
            0x03 => Ok(Command::Serial),
            0x06 => Ok(Command::Reset),
            0x07 => Ok(Command::Version),
            0x09 => Ok(Command::SetBrightness),
            0x0d => Ok(Command::Mcu),
            0x0f => Ok(Command::Draw),
            0x10 => Ok(Command::Framebuffer),
            0x1b => Ok(Command::SetVibration),
            0x4d => Ok(Command::Touch),
            0x52 => Ok(Command::TouchCt),
            0x6d => Ok(Command::TouchEnd),
            0x72 => Ok(Command::TouchEndCt),
            _ => Err(()),
        }
    }
}

/// Vibration patterns understood by the haptic motor.
///
/// Values were mapped by experiment; the `Rumble*` family plays progressively
/// lower frequencies and [`Haptic::VeryLong`] runs for about ten seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Haptic {
    #[default]
    Short = 0x01,
    Medium = 0x0a,
    Long = 0x0f,
    Low = 0x31,
    ShortLow = 0x32,
    ShortLower = 0x33,
    Lower = 0x40,
    Lowest = 0x41,
    DescendSlow = 0x46,
    DescendMed = 0x47,
    DescendFast = 0x48,
    AscendSlow = 0x52,
    AscendMed = 0x53,
    AscendFast = 0x58,
    RevSlowest = 0x5e,
    RevSlow = 0x5f,
    RevMed = 0x60,
    RevFast = 0x61,
    RevFaster = 0x62,
    RevFastest = 0x63,
    RiseFall = 0x6a,
    Buzz = 0x70,
    VeryLong = 0x76,
    Rumble5 = 0x77,
    Rumble4 = 0x78,
    Rumble3 = 0x79,
    Rumble2 = 0x7a,
    Rumble1 = 0x7b,
}

impl Haptic {
    /// Returns the pattern byte sent with [`Command::SetVibration`].
    pub fn code(self) -> u8 {
        self as u8
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
