//! Domain model: device profiles and panel geometry.

pub mod geometry;
pub mod profile;

pub use geometry::{Region, TouchTarget};
pub use profile::{
    profile_for, ByteOrder, Control, DeviceProfile, DisplaySpec, Feature, FunctionButton, KeyGrid,
    Knob, ProfileError, Screen, TouchLayout, PROFILES,
};
