//! Radio and GATT abstractions.
//!
//! The controller talks to the platform through these traits. Every call is
//! a non-blocking registration; completions come back as [`RadioEvent`]s on
//! the channel handed to [`RadioAdapter::start_scan`] and
//! [`RadioAdapter::connect`].

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::characteristics::{DescriptorWrite, GattCharacteristic, GattService};
use crate::error::Result;

/// Event delivered from the radio to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A peripheral was seen while scanning.
    DeviceDiscovered {
        /// Peripheral address.
        address: String,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// The bounded scan window for the given scan generation elapsed.
    ScanWindowElapsed {
        /// Generation of the scan the timer belonged to.
        generation: u64,
    },
    /// The link state of the current connection changed.
    ConnectionStateChanged {
        /// Whether the link is now up.
        connected: bool,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Whether discovery succeeded.
        success: bool,
    },
    /// A descriptor write finished.
    DescriptorWritten {
        /// Characteristic the descriptor belongs to.
        characteristic: Uuid,
        /// Whether the write was acknowledged.
        success: bool,
    },
    /// A characteristic read finished.
    CharacteristicRead {
        /// Characteristic that was read.
        characteristic: Uuid,
        /// Value returned.
        value: Bytes,
    },
    /// The peripheral pushed a new characteristic value.
    CharacteristicChanged {
        /// Characteristic that changed.
        characteristic: Uuid,
        /// New value.
        value: Bytes,
    },
}

/// Sending half of the radio event channel.
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;

/// Receiving half of the radio event channel.
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Create a new radio event channel.
pub fn radio_event_channel() -> (RadioEventSender, RadioEventReceiver) {
    mpsc::unbounded_channel()
}

/// Platform radio adapter.
pub trait RadioAdapter: Send {
    /// Connection type produced by [`RadioAdapter::connect`].
    type Connection: GattConnection;

    /// Whether the radio is powered on.
    fn is_enabled(&self) -> bool;

    /// Begin scanning. Discoveries are posted as [`RadioEvent::DeviceDiscovered`].
    fn start_scan(&mut self, events: RadioEventSender) -> Result<()>;

    /// Stop scanning. Stopping an idle scanner is a no-op.
    fn stop_scan(&mut self);

    /// Open a connection to a peripheral.
    ///
    /// Returns immediately; the link coming up is reported as
    /// [`RadioEvent::ConnectionStateChanged`].
    fn connect(
        &mut self,
        address: &str,
        auto_connect: bool,
        events: RadioEventSender,
    ) -> Result<Self::Connection>;
}

/// A single GATT connection to a peripheral.
pub trait GattConnection: Send {
    /// Address of the connected peripheral.
    fn address(&self) -> &str;

    /// Request service discovery. Completion is posted as
    /// [`RadioEvent::ServicesDiscovered`].
    fn discover_services(&mut self) -> Result<()>;

    /// Look up a discovered service.
    fn service(&self, uuid: &Uuid) -> Option<GattService>;

    /// Enable or disable local delivery of notifications for a characteristic.
    fn set_notification_enabled(
        &mut self,
        characteristic: &GattCharacteristic,
        enabled: bool,
    ) -> Result<()>;

    /// Queue a descriptor write. Completion is posted as
    /// [`RadioEvent::DescriptorWritten`].
    fn write_descriptor(&mut self, write: &DescriptorWrite) -> Result<()>;

    /// Close the transport. Must be safe to call more than once.
    fn close(&mut self);
}
