//! Typed client interface to a USB-attached CAN gateway device.
//!
//! This crate defines the capability set the rest of the daemon programs
//! against (the [`Gateway`] and [`GatewayFactory`] traits), the value types
//! that cross that seam, and a [`fake`] module providing in-memory test
//! doubles for both traits. It does not itself know about USB: a concrete
//! transport lives in a separate crate and is selected at open time.

mod error;
mod gateway;
mod types;

pub mod fake;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayFactory};
pub use types::{
    CanBusHealth, CanFrame, DiscoveredGateway, FaultBits, FaultKind, FaultStatus,
    GatewayCounters, GatewayHealth, HarnessStatus, HwType, LastErrorCodes, RtcTime, SafetyConfig,
    SafetyModel, UsbPowerMode, MAX_FRAME_DATA,
};
