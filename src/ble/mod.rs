//! BLE communication module.
//!
//! This module provides the radio seams, bounded scanning and GATT session
//! handling used by the device controller, plus a btleplug-backed radio.

pub mod adapter;
pub mod characteristics;
pub mod connection;
pub mod identity;
pub mod platform;
pub mod scanner;
pub mod session;
pub mod uuids;

#[cfg(test)]
pub(crate) mod sim;

pub use adapter::{GattConnection, RadioAdapter, RadioEvent, RadioEventSender};
pub use characteristics::{MeasurementEvent, MeasurementHandler};
pub use connection::{ConnectionHandle, ControllerState};
pub use identity::DeviceIdentity;
pub use platform::BtleplugRadio;
pub use scanner::RadioScanner;
pub use session::{GattSession, SubscriptionDescriptor, SubscriptionSummary};
pub use uuids::*;
