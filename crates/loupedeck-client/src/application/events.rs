//! Device events delivered to the application, and multi-touch bookkeeping.
//!
//! The touch controller reports one finger at a time.  [`TouchTracker`]
//! keeps the set of fingers currently down so every touch event can carry
//! both the full live set (`touches`) and the finger that changed
//! (`changed_touches`).

use std::collections::BTreeMap;

use loupedeck_core::{Control, TouchTarget};
use serde::Serialize;

/// One finger on the touch panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Touch {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    pub target: TouchTarget,
}

/// Payload shared by the three touch events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TouchUpdate {
    /// Every finger still down after this report, ordered by id.
    pub touches: Vec<Touch>,
    pub changed_touches: Vec<Touch>,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum DeviceEvent {
    Connect { address: String },
    /// `error` is `None` for a requested close.
    Disconnect { error: Option<String> },
    Down { id: Control },
    Up { id: Control },
    Rotate { id: Control, delta: i8 },
    TouchStart(TouchUpdate),
    TouchMove(TouchUpdate),
    TouchEnd(TouchUpdate),
}

/// Live touches, keyed by touch id.
#[derive(Debug, Default)]
pub struct TouchTracker {
    live: BTreeMap<u8, Touch>,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a report and returns the matching event.
    ///
    /// A new id starts a touch, a known id moves it, and `ended` removes it.
    pub fn observe(&mut self, touch: Touch, ended: bool) -> DeviceEvent {
        if ended {
            self.live.remove(&touch.id);
            return DeviceEvent::TouchEnd(self.update(touch));
        }
        let known = self.live.insert(touch.id, touch).is_some();
        if known {
            DeviceEvent::TouchMove(self.update(touch))
        } else {
            DeviceEvent::TouchStart(self.update(touch))
        }
    }

    pub fn clear(&mut self) {
        self.live.clear();
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn update(&self, changed: Touch) -> TouchUpdate {
        TouchUpdate {
            touches: self.live.values().copied().collect(),
            changed_touches: vec![changed],
        }
    }
}
