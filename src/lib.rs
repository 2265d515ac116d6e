// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # stresslink
//!
//! Connects to a Bluetooth Low Energy heart-rate peripheral, subscribes to its
//! measurement characteristics, and uploads collected heart rates and stress
//! surveys to a remote collection service.
//!
//! ## Features
//!
//! - **Bounded scanning**: Scan for one configured peripheral, giving up after a window
//! - **Subscription**: Enable notifications on every configured characteristic the peripheral exposes
//! - **Event-driven controller**: All radio callbacks flow through one channel into one state machine
//! - **Upload pipeline**: Background uploads with connectivity checks and collector callbacks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stresslink::ble::{DeviceIdentity, MeasurementEvent, HEART_RATE_MEASUREMENT_UUID,
//!     HEART_RATE_SERVICE_UUID};
//! use stresslink::{BleDeviceController, BtleplugRadio, ControllerConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let identity = DeviceIdentity::single(
//!         "00:11:22:33:44:55",
//!         HEART_RATE_SERVICE_UUID,
//!         HEART_RATE_MEASUREMENT_UUID,
//!     );
//!     let radio = BtleplugRadio::new().await?;
//!     let handler = |event: MeasurementEvent| {
//!         println!("{}: {:?}", event.characteristic, event.payload);
//!     };
//!
//!     let controller = BleDeviceController::new(identity, radio, handler, ControllerConfig::default())
//!         .spawn();
//!     if !controller.start().await {
//!         eprintln!("Bluetooth is off");
//!     }
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     controller.stop().await;
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod upload;

// Re-exports for convenience
pub use ble::{BtleplugRadio, ControllerState, DeviceIdentity, MeasurementEvent, MeasurementHandler};
pub use config::{ControllerConfig, UploadConfig};
pub use controller::{BleDeviceController, ControllerHandle, StateChange};
pub use error::{Error, Result};
pub use upload::{
    DataCollector, HttpUploadService, StressReport, TcpReachability, UploadAttempt,
    UploadPipeline, UserRecord,
};
