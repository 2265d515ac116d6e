//! Logical device identity.

use uuid::Uuid;

/// The peripheral a controller binds to and what it wants from it.
///
/// Services and measurements are parallel interest lists: every interested
/// measurement is looked up inside every interested service that the
/// peripheral exposes. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    address: String,
    services: Vec<Uuid>,
    measurements: Vec<Uuid>,
}

impl DeviceIdentity {
    /// Create an identity with several interested services and measurements.
    pub fn new(
        address: impl Into<String>,
        services: impl IntoIterator<Item = Uuid>,
        measurements: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            address: address.into(),
            services: dedup(services),
            measurements: dedup(measurements),
        }
    }

    /// Create an identity with a single service/measurement pair.
    pub fn single(address: impl Into<String>, service: Uuid, measurement: Uuid) -> Self {
        Self::new(address, [service], [measurement])
    }

    /// Peripheral address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Interested service UUIDs, in configuration order.
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    /// Interested characteristic UUIDs, in configuration order.
    pub fn measurements(&self) -> &[Uuid] {
        &self.measurements
    }

    /// Whether a discovered address refers to this device.
    ///
    /// Addresses are compared by value, ignoring ASCII case.
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

fn dedup(items: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;

    #[test]
    fn test_matches_address_by_value() {
        let identity = DeviceIdentity::single(
            "AA:BB:CC:DD:EE:FF",
            HEART_RATE_SERVICE_UUID,
            HEART_RATE_MEASUREMENT_UUID,
        );
        let discovered = String::from("AA:BB:CC:DD:EE:FF");
        assert!(identity.matches_address(&discovered));
        assert!(identity.matches_address("aa:bb:cc:dd:ee:ff"));
        assert!(!identity.matches_address("AA:BB:CC:DD:EE:00"));
    }

    #[test]
    fn test_interest_lists_keep_order_and_drop_duplicates() {
        let identity = DeviceIdentity::new(
            "AA:BB",
            [BATTERY_SERVICE_UUID, HEART_RATE_SERVICE_UUID, BATTERY_SERVICE_UUID],
            [HEART_RATE_MEASUREMENT_UUID],
        );
        assert_eq!(
            identity.services(),
            &[BATTERY_SERVICE_UUID, HEART_RATE_SERVICE_UUID]
        );
        assert_eq!(identity.measurements(), &[HEART_RATE_MEASUREMENT_UUID]);
    }
}
