//! Application layer: the device engine and the events it emits.
//!
//! # What lives here? (for beginners)
//!
//! - **`engine`**: [`engine::DeviceEngine`], the protocol engine.  It picks a
//!   transport, selects the device profile, assigns transaction ids, routes
//!   replies back to the request that caused them and reconnects after
//!   faults.  It only talks to transports through the `Transport` and
//!   `Discovery` traits, so tests swap in recording doubles.
//!
//! - **`events`**: the [`events::DeviceEvent`] values delivered to the
//!   application, plus the multi-touch bookkeeping that turns single touch
//!   reports into `touchstart` / `touchmove` / `touchend`.

pub mod engine;
pub mod events;
