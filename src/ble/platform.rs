//! Radio adapter backed by btleplug.
//!
//! Each registration call spawns a task that performs the async btleplug
//! operation and posts its completion back onto the controller's event
//! channel, so the controller never waits on the radio.

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{GattConnection, RadioAdapter, RadioEvent, RadioEventSender};
use crate::ble::characteristics::{DescriptorWrite, GattCharacteristic, GattService};
use crate::ble::uuids::DISABLE_NOTIFICATION_VALUE;
use crate::error::{Error, Result};

const UNKNOWN_ADDRESS: &str = "00:00:00:00:00:00";

/// Disconnect listeners keyed by peripheral.
type LinkMap = Arc<Mutex<HashMap<PeripheralId, RadioEventSender>>>;

/// Radio adapter using the first system Bluetooth adapter.
pub struct BtleplugRadio {
    /// The BLE adapter.
    adapter: Adapter,
    /// Whether the adapter reports itself powered on.
    powered: Arc<AtomicBool>,
    /// Where to post discoveries while a scan is running.
    scan_tx: Arc<Mutex<Option<RadioEventSender>>>,
    /// Open links, for forwarding disconnects.
    links: LinkMap,
    /// Adapter event pump.
    pump: JoinHandle<()>,
}

impl BtleplugRadio {
    /// Open the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterDisabled`] if no adapter is available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::AdapterDisabled)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::AdapterDisabled)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(adapter: Adapter) -> Result<Self> {
        let events = adapter.events().await.map_err(Error::Bluetooth)?;

        // Read after subscribing so a later StateUpdate is never overwritten.
        let powered = Arc::new(AtomicBool::new(initial_power(
            adapter.adapter_state().await,
        )));
        let scan_tx: Arc<Mutex<Option<RadioEventSender>>> = Arc::new(Mutex::new(None));
        let links: LinkMap = Arc::new(Mutex::new(HashMap::new()));

        let pump = {
            let adapter = adapter.clone();
            let powered = powered.clone();
            let scan_tx = scan_tx.clone();
            let links = links.clone();

            spawn_on_runtime("adapter events", async move {
                let mut events = events;
                while let Some(event) = events.next().await {
                    Self::handle_event(event, &adapter, &powered, &scan_tx, &links).await;
                }
                debug!("Adapter event stream ended");
            })?
        };

        Ok(Self {
            adapter,
            powered,
            scan_tx,
            links,
            pump,
        })
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        powered: &AtomicBool,
        scan_tx: &Mutex<Option<RadioEventSender>>,
        links: &LinkMap,
    ) {
        match event {
            CentralEvent::StateUpdate(state) => {
                let on = matches!(state, CentralState::PoweredOn);
                debug!("Adapter state update: {:?}", state);
                powered.store(on, Ordering::SeqCst);
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let tx = match scan_tx.lock().clone() {
                    Some(tx) => tx,
                    None => return,
                };

                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        return;
                    }
                };

                let properties = match peripheral.properties().await {
                    Ok(Some(p)) => p,
                    _ => return,
                };

                let _ = tx.send(RadioEvent::DeviceDiscovered {
                    address: peripheral_address(&id, &properties.address.to_string()),
                    rssi: properties.rssi,
                });
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(tx) = links.lock().remove(&id) {
                    debug!("Device disconnected: {:?}", id);
                    let _ = tx.send(RadioEvent::ConnectionStateChanged { connected: false });
                }
            }
            _ => {}
        }
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Power state to assume before the first adapter state update.
fn initial_power(state: std::result::Result<CentralState, btleplug::Error>) -> bool {
    match state {
        Ok(state) => {
            debug!("Initial adapter state: {:?}", state);
            matches!(state, CentralState::PoweredOn)
        }
        Err(e) => {
            warn!("Could not read adapter state, treating it as off: {}", e);
            false
        }
    }
}

/// Run a radio operation on the current runtime.
fn spawn_on_runtime<F>(what: &str, operation: F) -> Result<JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|_| Error::Internal(format!("no async runtime available for {}", what)))?;
    Ok(runtime.spawn(operation))
}

/// Run a radio operation nobody waits on. Outside a runtime it is skipped
/// with a warning.
fn spawn_detached<F>(what: &str, operation: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Err(e) = spawn_on_runtime(what, operation) {
        warn!("Skipping {}: {}", what, e);
    }
}

/// Address string for a peripheral. Platforms that hide the MAC address
/// (macOS) report all zeros, in which case the platform identifier is used.
fn peripheral_address(id: &PeripheralId, mac: &str) -> String {
    if mac == UNKNOWN_ADDRESS {
        id.to_string()
    } else {
        mac.to_string()
    }
}

impl RadioAdapter for BtleplugRadio {
    type Connection = BtleplugConnection;

    fn is_enabled(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    fn start_scan(&mut self, events: RadioEventSender) -> Result<()> {
        *self.scan_tx.lock() = Some(events);

        let adapter = self.adapter.clone();
        spawn_detached("scan start", async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start scan: {}", e);
            }
        });

        Ok(())
    }

    fn stop_scan(&mut self) {
        if self.scan_tx.lock().take().is_none() {
            return;
        }

        let adapter = self.adapter.clone();
        spawn_detached("scan stop", async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(
        &mut self,
        address: &str,
        auto_connect: bool,
        events: RadioEventSender,
    ) -> Result<BtleplugConnection> {
        if auto_connect {
            debug!("Auto-connect is managed by the platform stack; connecting directly");
        }

        let connection =
            BtleplugConnection::new(address.to_string(), events.clone(), self.links.clone());

        let adapter = self.adapter.clone();
        let links = self.links.clone();
        let slot = connection.peripheral.clone();
        let target = address.to_string();

        let task = spawn_on_runtime("connect", async move {
            let connected = match find_peripheral(&adapter, &target).await {
                Some(peripheral) => match peripheral.connect().await {
                    Ok(()) => {
                        info!("Connected to {}", target);
                        links.lock().insert(peripheral.id(), events.clone());
                        *slot.write() = Some(peripheral);
                        true
                    }
                    Err(e) => {
                        warn!("Connection to {} failed: {}", target, e);
                        false
                    }
                },
                None => {
                    warn!("Peripheral {} no longer known to adapter", target);
                    false
                }
            };

            let _ = events.send(RadioEvent::ConnectionStateChanged { connected });
        })?;

        connection.tasks.lock().push(task);
        Ok(connection)
    }
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Option<Peripheral> {
    let peripherals = adapter.peripherals().await.ok()?;

    for peripheral in peripherals {
        let mac = match peripheral.properties().await {
            Ok(Some(properties)) => properties.address.to_string(),
            _ => continue,
        };
        if peripheral_address(&peripheral.id(), &mac).eq_ignore_ascii_case(address) {
            return Some(peripheral);
        }
    }

    None
}

/// A GATT connection backed by a btleplug peripheral.
pub struct BtleplugConnection {
    /// Address the connection was opened for.
    address: String,
    /// Peripheral, once connected.
    peripheral: Arc<RwLock<Option<Peripheral>>>,
    /// Snapshot of discovered services.
    services: Arc<RwLock<Vec<GattService>>>,
    /// Characteristics with local notification delivery enabled.
    enabled: Arc<RwLock<HashSet<Uuid>>>,
    /// Channel for completion events.
    events: RadioEventSender,
    /// Shared disconnect listeners.
    links: LinkMap,
    /// Outstanding operation tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Notification forwarding task.
    notifications: Option<JoinHandle<()>>,
    /// Flips to `true` once the notification stream is open.
    notifications_ready: Option<watch::Receiver<bool>>,
}

impl BtleplugConnection {
    fn new(address: String, events: RadioEventSender, links: LinkMap) -> Self {
        Self {
            address,
            peripheral: Arc::new(RwLock::new(None)),
            services: Arc::new(RwLock::new(Vec::new())),
            enabled: Arc::new(RwLock::new(HashSet::new())),
            events,
            links,
            tasks: Mutex::new(Vec::new()),
            notifications: None,
            notifications_ready: None,
        }
    }

    fn connected_peripheral(&self) -> Result<Peripheral> {
        self.peripheral
            .read()
            .clone()
            .ok_or(Error::NoActiveConnection)
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service_uuid: Uuid,
        uuid: Uuid,
    ) -> Option<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
    }
}

fn convert_service(service: &btleplug::api::Service) -> GattService {
    let characteristics = service
        .characteristics
        .iter()
        .map(|c| {
            GattCharacteristic::new(
                c.uuid,
                service.uuid,
                c.descriptors.iter().map(|d| d.uuid).collect(),
            )
        })
        .collect();
    GattService::new(service.uuid, characteristics)
}

impl GattConnection for BtleplugConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn discover_services(&mut self) -> Result<()> {
        let peripheral = self.connected_peripheral()?;
        let services = self.services.clone();
        let events = self.events.clone();

        let task = spawn_on_runtime("service discovery", async move {
            let success = match peripheral.discover_services().await {
                Ok(()) => {
                    let discovered: Vec<GattService> =
                        peripheral.services().iter().map(convert_service).collect();
                    debug!("Discovered {} services", discovered.len());
                    *services.write() = discovered;
                    true
                }
                Err(e) => {
                    warn!("Failed to discover services: {}", e);
                    false
                }
            };
            let _ = events.send(RadioEvent::ServicesDiscovered { success });
        })?;
        self.track(task);

        Ok(())
    }

    fn service(&self, uuid: &Uuid) -> Option<GattService> {
        self.services.read().iter().find(|s| s.uuid == *uuid).cloned()
    }

    fn set_notification_enabled(
        &mut self,
        characteristic: &GattCharacteristic,
        enabled: bool,
    ) -> Result<()> {
        if !enabled {
            self.enabled.write().remove(&characteristic.uuid);
            return Ok(());
        }

        self.enabled.write().insert(characteristic.uuid);

        if self.notifications.is_some() {
            return Ok(());
        }

        let peripheral = self.connected_peripheral()?;
        let filter = self.enabled.clone();
        let events = self.events.clone();
        let (ready_tx, ready_rx) = watch::channel(false);

        let task = spawn_on_runtime("notification listener", async move {
            let mut stream = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };
            let _ = ready_tx.send(true);

            while let Some(notification) = stream.next().await {
                if !filter.read().contains(&notification.uuid) {
                    continue;
                }
                let event = RadioEvent::CharacteristicChanged {
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                };
                if events.send(event).is_err() {
                    break;
                }
            }

            debug!("Notification listener stopped");
        })?;

        self.notifications = Some(task);
        self.notifications_ready = Some(ready_rx);
        Ok(())
    }

    fn write_descriptor(&mut self, write: &DescriptorWrite) -> Result<()> {
        let peripheral = self.connected_peripheral()?;
        let characteristic = Self::find_characteristic(
            &peripheral,
            write.descriptor.service_uuid,
            write.descriptor.characteristic_uuid,
        )
        .ok_or_else(|| Error::InvalidParameter {
            name: "characteristic".to_string(),
            value: write.descriptor.characteristic_uuid.to_string(),
        })?;

        let disable = write.value == DISABLE_NOTIFICATION_VALUE;
        let events = self.events.clone();
        let ready = self.notifications_ready.clone();

        // btleplug owns the CCCD write; subscribe/unsubscribe perform it.
        let task = spawn_on_runtime("descriptor write", async move {
            if let (false, Some(mut ready)) = (disable, ready) {
                let open = ready.wait_for(|open| *open).await.is_ok();
                if !open {
                    warn!(
                        "Notification stream unavailable, values from {} will be lost",
                        characteristic.uuid
                    );
                }
            }

            let result = if disable {
                peripheral.unsubscribe(&characteristic).await
            } else {
                peripheral.subscribe(&characteristic).await
            };
            if let Err(e) = &result {
                warn!("Descriptor write for {} failed: {}", characteristic.uuid, e);
            }
            let _ = events.send(RadioEvent::DescriptorWritten {
                characteristic: characteristic.uuid,
                success: result.is_ok(),
            });
        })?;
        self.track(task);

        Ok(())
    }

    fn close(&mut self) {
        if let Some(handle) = self.notifications.take() {
            handle.abort();
        }
        self.notifications_ready = None;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let peripheral = self.peripheral.write().take();
        if let Some(peripheral) = peripheral {
            debug!("Disconnecting from {}", self.address);
            self.links.lock().remove(&peripheral.id());
            spawn_detached("disconnect", async move {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to disconnect: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_power_follows_adapter_state() {
        assert!(initial_power(Ok(CentralState::PoweredOn)));
        assert!(!initial_power(Ok(CentralState::PoweredOff)));
        assert!(!initial_power(Ok(CentralState::Unknown)));
        assert!(!initial_power(Err(btleplug::Error::NotSupported(
            "adapter state".to_string()
        ))));
    }

    #[test]
    fn test_spawn_outside_runtime_is_an_error() {
        let result = spawn_on_runtime("test", async {});
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_spawn_inside_runtime() {
        let task = spawn_on_runtime("test", async {}).unwrap();
        task.await.unwrap();
    }
}
