//! Simulated radio and peripheral for exercising the controller.
//!
//! Every registration call completes immediately by posting the matching
//! event onto the supplied channel, so draining the channel plays out a full
//! connect/discover/subscribe sequence.

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use crate::ble::adapter::{GattConnection, RadioAdapter, RadioEvent, RadioEventSender};
use crate::ble::characteristics::{DescriptorWrite, GattCharacteristic, GattService};
use crate::ble::uuids::CLIENT_CHARACTERISTIC_CONFIG_UUID;
use crate::error::Result;

/// Calls observed by the simulated radio.
#[derive(Debug, Default, Clone)]
pub struct SimLog {
    pub scan_starts: usize,
    pub scan_stops: usize,
    pub connects: Vec<String>,
    pub discover_requests: usize,
    pub notifications_enabled: Vec<Uuid>,
    pub descriptor_writes: Vec<DescriptorWrite>,
    pub closes: usize,
}

/// Simulated adapter advertising a fixed set of peripherals.
pub struct SimulatedRadio {
    enabled: bool,
    advertised: Vec<String>,
    services: Vec<GattService>,
    discovery_succeeds: bool,
    log: Arc<Mutex<SimLog>>,
}

impl SimulatedRadio {
    /// A powered radio that sees no peripherals.
    pub fn new() -> Self {
        Self {
            enabled: true,
            advertised: Vec::new(),
            services: Vec::new(),
            discovery_succeeds: true,
            log: Arc::new(Mutex::new(SimLog::default())),
        }
    }

    /// A powered radio that sees one peripheral exposing `services`.
    pub fn with_peripheral(address: &str, services: Vec<GattService>) -> Self {
        let mut radio = Self::new();
        radio.advertised.push(address.to_string());
        radio.services = services;
        radio
    }

    /// Also advertise an unrelated peripheral.
    pub fn advertise(&mut self, address: &str) {
        self.advertised.insert(0, address.to_string());
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_discovery_result(&mut self, success: bool) {
        self.discovery_succeeds = success;
    }

    /// Snapshot of observed calls.
    pub fn log(&self) -> SimLog {
        self.log.lock().clone()
    }
}

/// Build a service whose characteristics all carry a CCCD.
pub fn notifying_service(uuid: Uuid, characteristics: &[Uuid]) -> GattService {
    GattService::new(
        uuid,
        characteristics
            .iter()
            .map(|c| GattCharacteristic::new(*c, uuid, vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]))
            .collect(),
    )
}

impl RadioAdapter for SimulatedRadio {
    type Connection = SimulatedConnection;

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn start_scan(&mut self, events: RadioEventSender) -> Result<()> {
        self.log.lock().scan_starts += 1;
        for address in &self.advertised {
            let _ = events.send(RadioEvent::DeviceDiscovered {
                address: address.clone(),
                rssi: Some(-60),
            });
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.log.lock().scan_stops += 1;
    }

    fn connect(
        &mut self,
        address: &str,
        _auto_connect: bool,
        events: RadioEventSender,
    ) -> Result<SimulatedConnection> {
        self.log.lock().connects.push(address.to_string());
        let _ = events.send(RadioEvent::ConnectionStateChanged { connected: true });
        Ok(SimulatedConnection {
            address: address.to_string(),
            services: self.services.clone(),
            discovery_succeeds: self.discovery_succeeds,
            discovered: false,
            events,
            log: self.log.clone(),
        })
    }
}

/// Connection produced by [`SimulatedRadio`].
pub struct SimulatedConnection {
    address: String,
    services: Vec<GattService>,
    discovery_succeeds: bool,
    discovered: bool,
    events: RadioEventSender,
    log: Arc<Mutex<SimLog>>,
}

impl GattConnection for SimulatedConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn discover_services(&mut self) -> Result<()> {
        self.log.lock().discover_requests += 1;
        self.discovered = self.discovery_succeeds;
        let _ = self.events.send(RadioEvent::ServicesDiscovered {
            success: self.discovery_succeeds,
        });
        Ok(())
    }

    fn service(&self, uuid: &Uuid) -> Option<GattService> {
        if !self.discovered {
            return None;
        }
        self.services.iter().find(|s| s.uuid == *uuid).cloned()
    }

    fn set_notification_enabled(
        &mut self,
        characteristic: &GattCharacteristic,
        enabled: bool,
    ) -> Result<()> {
        if enabled {
            self.log.lock().notifications_enabled.push(characteristic.uuid);
        }
        Ok(())
    }

    fn write_descriptor(&mut self, write: &DescriptorWrite) -> Result<()> {
        self.log.lock().descriptor_writes.push(write.clone());
        let _ = self.events.send(RadioEvent::DescriptorWritten {
            characteristic: write.descriptor.characteristic_uuid,
            success: true,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closes += 1;
    }
}
