//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Contains the well-known UUIDs used when subscribing to measurement
//! characteristics.

use uuid::Uuid;

/// Client Characteristic Configuration Descriptor (CCCD) UUID.
///
/// Writing [`ENABLE_NOTIFICATION_VALUE`] to this descriptor asks the
/// peripheral to push value changes.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Value written to the CCCD to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Value written to the CCCD to disable notifications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// Heart Rate Service (Standard BLE)
/// Standard BLE Heart Rate Service UUID.
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);
/// Heart Rate Measurement characteristic UUID (Notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_00805f9b34fb);

// Battery Service (Standard BLE)
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID (Read, Notify).
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
        assert!(HEART_RATE_SERVICE_UUID.to_string().contains("180d"));
        assert!(HEART_RATE_MEASUREMENT_UUID.to_string().contains("2a37"));
    }

    #[test]
    fn test_notification_values() {
        assert_eq!(ENABLE_NOTIFICATION_VALUE, [1, 0]);
        assert_eq!(DISABLE_NOTIFICATION_VALUE, [0, 0]);
    }
}
