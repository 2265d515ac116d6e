//! GATT session handling.
//!
//! A [`GattSession`] owns one connection to one peripheral and issues the
//! notification subscriptions for a [`DeviceIdentity`]'s interest set.

use std::collections::HashSet;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::GattConnection;
use crate::ble::characteristics::{DescriptorWrite, GattCharacteristic, GattDescriptor};
use crate::ble::connection::ConnectionHandle;
use crate::ble::identity::DeviceIdentity;
use crate::error::Result;

/// A matched characteristic and the configuration descriptor written to arm it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    /// The characteristic being subscribed to.
    pub characteristic: GattCharacteristic,
    /// Its client configuration descriptor.
    pub descriptor: GattDescriptor,
}

/// What a subscription pass managed to match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSummary {
    /// Number of descriptor writes issued.
    pub issued: usize,
    /// Interested services the peripheral does not expose.
    pub missing_services: Vec<Uuid>,
    /// (service, characteristic) pairs not found within a present service.
    pub missing_characteristics: Vec<(Uuid, Uuid)>,
    /// Matched characteristics without a configuration descriptor.
    pub missing_descriptors: Vec<Uuid>,
    /// Matched characteristics whose enable or write call failed.
    pub failed: Vec<Uuid>,
}

impl SubscriptionSummary {
    /// Total number of interests that could not be armed.
    pub fn missing(&self) -> usize {
        self.missing_services.len()
            + self.missing_characteristics.len()
            + self.missing_descriptors.len()
            + self.failed.len()
    }

    /// Whether every interest was matched and written.
    pub fn is_complete(&self) -> bool {
        self.missing() == 0
    }
}

/// One live session with a peripheral.
pub struct GattSession<C: GattConnection> {
    handle: ConnectionHandle<C>,
    subscriptions: Vec<SubscriptionDescriptor>,
    armed: HashSet<Uuid>,
}

impl<C: GattConnection> GattSession<C> {
    /// Wrap a freshly opened connection.
    pub fn new(handle: ConnectionHandle<C>) -> Self {
        Self {
            handle,
            subscriptions: Vec::new(),
            armed: HashSet::new(),
        }
    }

    /// Address of the connected peripheral.
    pub fn address(&self) -> &str {
        self.handle.address()
    }

    /// Request service discovery.
    pub fn discover_services(&mut self) -> Result<()> {
        debug!("Requesting service discovery on {}", self.address());
        self.handle.connection_mut().discover_services()
    }

    /// Subscribe to every interested characteristic the peripheral exposes.
    ///
    /// Absent services, characteristics and descriptors are skipped; the
    /// returned summary says what was left out.
    pub fn subscribe(&mut self, identity: &DeviceIdentity) -> SubscriptionSummary {
        let mut summary = SubscriptionSummary::default();

        for service_uuid in identity.services() {
            let service = match self.handle.connection().service(service_uuid) {
                Some(service) => service,
                None => {
                    debug!("Service {} not present, skipping", service_uuid);
                    summary.missing_services.push(*service_uuid);
                    continue;
                }
            };

            for measurement_uuid in identity.measurements() {
                let characteristic = match service.characteristic(measurement_uuid) {
                    Some(c) => c.clone(),
                    None => {
                        trace!(
                            "Characteristic {} not in service {}",
                            measurement_uuid,
                            service_uuid
                        );
                        summary
                            .missing_characteristics
                            .push((*service_uuid, *measurement_uuid));
                        continue;
                    }
                };

                match self.arm(&characteristic) {
                    Ok(Some(descriptor)) => {
                        summary.issued += 1;
                        self.subscriptions.push(SubscriptionDescriptor {
                            characteristic,
                            descriptor,
                        });
                    }
                    Ok(None) => summary.missing_descriptors.push(characteristic.uuid),
                    Err(e) => {
                        warn!("Failed to subscribe to {}: {}", characteristic.uuid, e);
                        summary.failed.push(characteristic.uuid);
                    }
                }
            }
        }

        info!(
            "Issued {} subscription(s) on {} ({} interest(s) missing)",
            summary.issued,
            self.address(),
            summary.missing()
        );

        summary
    }

    fn arm(&mut self, characteristic: &GattCharacteristic) -> Result<Option<GattDescriptor>> {
        let connection = self.handle.connection_mut();
        connection.set_notification_enabled(characteristic, true)?;

        let descriptor = match characteristic.client_config_descriptor() {
            Some(d) => d,
            None => {
                warn!(
                    "Characteristic {} has no configuration descriptor",
                    characteristic.uuid
                );
                return Ok(None);
            }
        };

        connection.write_descriptor(&DescriptorWrite::enable_notifications(descriptor))?;
        debug!("Enable-notification write issued for {}", characteristic.uuid);

        Ok(Some(descriptor))
    }

    /// Record the completion of a configuration descriptor write.
    pub fn record_descriptor_write(&mut self, characteristic: Uuid, success: bool) {
        if !self.is_subscribed(&characteristic) {
            trace!("Descriptor write for unknown characteristic {}", characteristic);
            return;
        }
        if success {
            self.armed.insert(characteristic);
        } else {
            warn!("Peripheral rejected subscription for {}", characteristic);
            self.armed.remove(&characteristic);
        }
    }

    /// Issued subscriptions, in issue order.
    pub fn subscriptions(&self) -> &[SubscriptionDescriptor] {
        &self.subscriptions
    }

    /// Check if a characteristic has a subscription issued.
    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.characteristic.uuid == *characteristic)
    }

    /// Number of subscriptions acknowledged by the peripheral.
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Close the session and its transport.
    pub fn close(self) {
        self.handle.close();
    }
}
