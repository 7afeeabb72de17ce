//! Infrastructure layer: transports to the hardware and configuration.

pub mod config;
pub mod transport;
