//! GATT attribute types and measurement delivery.
//!
//! Provides platform-neutral descriptions of discovered services,
//! characteristics and descriptors, plus the [`MeasurementHandler`] hook
//! that receives characteristic payloads.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ble::uuids::{CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE};

/// A descriptor attached to a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattDescriptor {
    /// UUID of the descriptor.
    pub uuid: Uuid,
    /// UUID of the owning characteristic.
    pub characteristic_uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
}

/// A characteristic discovered on a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// UUID of the characteristic.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// UUIDs of the descriptors exposed by this characteristic.
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    /// Create a characteristic description.
    pub fn new(uuid: Uuid, service_uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self {
            uuid,
            service_uuid,
            descriptors,
        }
    }

    /// Look up a descriptor by UUID.
    pub fn descriptor(&self, uuid: &Uuid) -> Option<GattDescriptor> {
        self.descriptors
            .iter()
            .find(|d| *d == uuid)
            .map(|d| GattDescriptor {
                uuid: *d,
                characteristic_uuid: self.uuid,
                service_uuid: self.service_uuid,
            })
    }

    /// Get the client configuration descriptor, if present.
    pub fn client_config_descriptor(&self) -> Option<GattDescriptor> {
        self.descriptor(&CLIENT_CHARACTERISTIC_CONFIG_UUID)
    }
}

/// A service discovered on a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// UUID of the service.
    pub uuid: Uuid,
    /// Characteristics contained in this service.
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Create a service description.
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    /// Look up a characteristic within this service.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// A pending write of a value to a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Target descriptor.
    pub descriptor: GattDescriptor,
    /// Value to write.
    pub value: Vec<u8>,
}

impl DescriptorWrite {
    /// Build the standard "enable notifications" write for a CCCD.
    pub fn enable_notifications(descriptor: GattDescriptor) -> Self {
        Self {
            descriptor,
            value: ENABLE_NOTIFICATION_VALUE.to_vec(),
        }
    }
}

/// A characteristic value received from the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementEvent {
    /// UUID of the characteristic that produced the value.
    pub characteristic: Uuid,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// When the value was received.
    pub received_at: DateTime<Utc>,
}

impl MeasurementEvent {
    /// Create an event stamped with the current time.
    pub fn now(characteristic: Uuid, payload: Bytes) -> Self {
        Self {
            characteristic,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Interprets characteristic payloads for a concrete device type.
///
/// Invoked once per radio event while the controller is active. Delivery is
/// at-most-once; implementations must not block.
pub trait MeasurementHandler: Send {
    /// Handle a characteristic value.
    fn check_context(&mut self, event: MeasurementEvent);
}

impl<F> MeasurementHandler for F
where
    F: FnMut(MeasurementEvent) + Send,
{
    fn check_context(&mut self, event: MeasurementEvent) {
        self(event)
    }
}
