//! Device controller for one BLE peripheral.
//!
//! Binds a [`DeviceIdentity`] to a GATT session, scans on demand and routes
//! characteristic payloads to a [`MeasurementHandler`]. All radio callbacks
//! arrive as [`RadioEvent`]s on a single channel and are applied one at a
//! time by [`BleDeviceController::handle_event`], so state transitions need
//! no locking beyond the published state snapshot.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::adapter::{
    radio_event_channel, RadioAdapter, RadioEvent, RadioEventReceiver, RadioEventSender,
};
use crate::ble::characteristics::{MeasurementEvent, MeasurementHandler};
use crate::ble::connection::{ConnectionHandle, ControllerState};
use crate::ble::identity::DeviceIdentity;
use crate::ble::scanner::RadioScanner;
use crate::ble::session::{GattSession, SubscriptionSummary};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};

/// Event emitted on every controller state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub from: ControllerState,
    /// State after the transition.
    pub to: ControllerState,
}

/// State machine driving one peripheral.
pub struct BleDeviceController<R: RadioAdapter, H: MeasurementHandler> {
    /// The device this controller binds to.
    identity: DeviceIdentity,
    /// Controller settings.
    config: ControllerConfig,
    /// Platform radio.
    radio: R,
    /// Receiver of measurement payloads.
    handler: H,
    /// Bounded scanner.
    scanner: RadioScanner,
    /// Live session, if connected.
    session: Option<GattSession<R::Connection>>,
    /// Result of the most recent subscription pass.
    last_summary: Option<SubscriptionSummary>,
    /// Current state, shared with handles.
    state: Arc<RwLock<ControllerState>>,
    /// Channel for state transitions.
    state_tx: broadcast::Sender<StateChange>,
    /// Sending half of the radio event channel, handed to the radio.
    events_tx: RadioEventSender,
    /// Receiving half of the radio event channel.
    events_rx: RadioEventReceiver,
}

impl<R: RadioAdapter, H: MeasurementHandler> BleDeviceController<R, H> {
    /// Create a controller for `identity` using the given radio and handler.
    pub fn new(identity: DeviceIdentity, radio: R, handler: H, config: ControllerConfig) -> Self {
        let (events_tx, events_rx) = radio_event_channel();
        let (state_tx, _) = broadcast::channel(32);

        Self {
            identity,
            scanner: RadioScanner::new(config.scan_window),
            config,
            radio,
            handler,
            session: None,
            last_summary: None,
            state: Arc::new(RwLock::new(ControllerState::Idle)),
            state_tx,
            events_tx,
            events_rx,
        }
    }

    /// The device identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Get the current state.
    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// A sender for injecting radio events.
    pub fn event_sender(&self) -> RadioEventSender {
        self.events_tx.clone()
    }

    /// Check if a connection is held.
    pub fn has_connection(&self) -> bool {
        self.session.is_some()
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<&GattSession<R::Connection>> {
        self.session.as_ref()
    }

    /// Result of the most recent subscription pass.
    pub fn last_subscription(&self) -> Option<&SubscriptionSummary> {
        self.last_summary.as_ref()
    }

    /// Get the radio.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Get the radio mutably.
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Get the measurement handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    // === Lifecycle ===

    /// Start looking for the device.
    ///
    /// Returns `false` if the radio is off. Scanning continues in the
    /// background; the result only says whether it was started.
    pub fn start(&mut self) -> bool {
        match self.try_start() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to start {}: {}", self.identity.address(), e);
                false
            }
        }
    }

    /// Resume after a pause. Same contract as [`start`](Self::start).
    pub fn resume(&mut self) -> bool {
        self.start()
    }

    /// Start looking for the device, reporting why it failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterDisabled`] if the radio is off.
    pub fn try_start(&mut self) -> Result<()> {
        if !self.radio.is_enabled() {
            return Err(Error::AdapterDisabled);
        }

        let state = self.state();
        if state != ControllerState::Idle {
            debug!("Start requested in {} state, nothing to do", state);
            return Ok(());
        }

        self.scanner.start(&mut self.radio, &self.events_tx)?;
        self.set_state(ControllerState::Scanning);
        Ok(())
    }

    /// Release the connection, if any.
    ///
    /// Returns `false` if there was nothing to release.
    pub fn pause(&mut self) -> bool {
        self.try_stop().is_ok()
    }

    /// Release the connection, if any. Same contract as [`pause`](Self::pause).
    pub fn stop(&mut self) -> bool {
        self.try_stop().is_ok()
    }

    /// Stop scanning and release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveConnection`] if no connection was held.
    pub fn try_stop(&mut self) -> Result<()> {
        self.scanner.stop(&mut self.radio);

        if self.release_session() {
            Ok(())
        } else {
            if self.state() != ControllerState::Idle {
                self.set_state(ControllerState::Idle);
            }
            debug!("Nothing to release for {}", self.identity.address());
            Err(Error::NoActiveConnection)
        }
    }

    // === Event handling ===

    /// Apply one radio event.
    pub fn handle_event(&mut self, event: RadioEvent) {
        if self.state() != ControllerState::Idle && !self.radio.is_enabled() {
            warn!("Adapter disabled, tearing down {}", self.identity.address());
            self.scanner.stop(&mut self.radio);
            if !self.release_session() {
                self.set_state(ControllerState::Idle);
            }
            return;
        }

        match event {
            RadioEvent::DeviceDiscovered { address, rssi } => {
                self.on_device_discovered(&address, rssi)
            }
            RadioEvent::ScanWindowElapsed { generation } => self.on_scan_window_elapsed(generation),
            RadioEvent::ConnectionStateChanged { connected } => {
                self.on_connection_state_change(connected)
            }
            RadioEvent::ServicesDiscovered { success } => self.on_services_discovered(success),
            RadioEvent::DescriptorWritten {
                characteristic,
                success,
            } => {
                if let Some(session) = self.session.as_mut() {
                    session.record_descriptor_write(characteristic, success);
                }
            }
            RadioEvent::CharacteristicRead {
                characteristic,
                value,
            }
            | RadioEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.on_characteristic_value(MeasurementEvent::now(characteristic, value)),
        }
    }

    /// Apply every event already queued, including ones queued while applying.
    ///
    /// Returns the number of events applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next radio event and apply it.
    pub async fn next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
    }

    fn on_device_discovered(&mut self, address: &str, rssi: Option<i16>) {
        if self.state() != ControllerState::Scanning {
            trace!("Ignoring discovery of {} outside scan", address);
            return;
        }

        if !self.identity.matches_address(address) {
            trace!("Discovered non-matching device {}", address);
            return;
        }

        info!("Found {} (rssi {:?}), connecting", address, rssi);

        // A match wins over the scan window.
        self.scanner.stop(&mut self.radio);
        self.set_state(ControllerState::Connecting);

        match self
            .radio
            .connect(address, self.config.auto_connect, self.events_tx.clone())
        {
            Ok(connection) => {
                self.session = Some(GattSession::new(ConnectionHandle::new(connection)));
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", address, e);
                self.set_state(ControllerState::Idle);
            }
        }
    }

    fn on_scan_window_elapsed(&mut self, generation: u64) {
        if !self.scanner.on_window_elapsed(&mut self.radio, generation) {
            return;
        }

        if self.state() == ControllerState::Scanning {
            info!(
                "{} not found within {:?}, scan stopped",
                self.identity.address(),
                self.scanner.window()
            );
            self.set_state(ControllerState::Idle);
        }
    }

    fn on_connection_state_change(&mut self, connected: bool) {
        if connected {
            if self.state() != ControllerState::Connecting || self.session.is_none() {
                debug!("Ignoring connected signal in {} state", self.state());
                return;
            }

            self.set_state(ControllerState::DiscoveringServices);

            let result = match self.session.as_mut() {
                Some(session) => session.discover_services(),
                None => return,
            };

            if let Err(e) = result {
                warn!("Service discovery request failed: {}", e);
                self.release_session();
            }
        } else if self.session.is_some() {
            info!("{} disconnected", self.identity.address());
            self.release_session();
        } else {
            trace!("Disconnect signal with no connection held");
        }
    }

    fn on_services_discovered(&mut self, success: bool) {
        if self.state() != ControllerState::DiscoveringServices {
            debug!("Ignoring discovery result in {} state", self.state());
            return;
        }

        if !success {
            warn!(
                "Service discovery failed on {}, abandoning session",
                self.identity.address()
            );
            self.release_session();
            return;
        }

        self.set_state(ControllerState::Subscribing);

        let summary = match self.session.as_mut() {
            Some(session) => session.subscribe(&self.identity),
            None => return,
        };

        if !summary.is_complete() {
            debug!(
                "{}",
                Error::DiscoveryIncomplete {
                    missing: summary.missing()
                }
            );
        }
        self.last_summary = Some(summary);

        self.set_state(ControllerState::Active);
    }

    fn on_characteristic_value(&mut self, event: MeasurementEvent) {
        if !self.state().is_active() {
            trace!(
                "Dropping value from {} in {} state",
                event.characteristic,
                self.state()
            );
            return;
        }

        trace!(
            "Measurement from {}: {} bytes",
            event.characteristic,
            event.payload.len()
        );
        self.handler.check_context(event);
    }

    /// Close the session if one is held. Returns whether anything was released.
    fn release_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                self.set_state(ControllerState::Closing);
                session.close();
                self.set_state(ControllerState::Idle);
                true
            }
            None => false,
        }
    }

    /// Update the state and emit a transition event.
    fn set_state(&self, new_state: ControllerState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Controller state changed: {} -> {}", old_state, new_state);

            let _ = self.state_tx.send(StateChange {
                from: old_state,
                to: new_state,
            });
        }
    }
}

impl<R, H> BleDeviceController<R, H>
where
    R: RadioAdapter + 'static,
    R::Connection: 'static,
    H: MeasurementHandler + 'static,
{
    /// Move the controller onto its own task.
    ///
    /// Commands from the returned handle and radio events are applied in
    /// arrival order on that task.
    pub fn spawn(mut self) -> ControllerHandle {
        let (command_tx, mut command_rx) = mpsc::channel::<Command>(16);
        let state = self.state.clone();
        let state_tx = self.state_tx.clone();
        let events_tx = self.events_tx.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Queued radio events are applied before later commands.
                    biased;

                    Some(event) = self.events_rx.recv() => {
                        self.handle_event(event);
                    }
                    command = command_rx.recv() => match command {
                        Some(Command::Start(reply)) => {
                            let _ = reply.send(self.start());
                        }
                        Some(Command::Resume(reply)) => {
                            let _ = reply.send(self.resume());
                        }
                        Some(Command::Pause(reply)) => {
                            let _ = reply.send(self.pause());
                        }
                        Some(Command::Stop(reply)) => {
                            let _ = reply.send(self.stop());
                        }
                        None => break,
                    },
                }
            }

            debug!("Controller task for {} ended", self.identity.address());
        });

        ControllerHandle {
            command_tx,
            state,
            state_tx,
            events_tx,
            task,
        }
    }
}

impl<R: RadioAdapter, H: MeasurementHandler> Drop for BleDeviceController<R, H> {
    fn drop(&mut self) {
        self.scanner.stop(&mut self.radio);
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

enum Command {
    Start(oneshot::Sender<bool>),
    Resume(oneshot::Sender<bool>),
    Pause(oneshot::Sender<bool>),
    Stop(oneshot::Sender<bool>),
}

/// Handle to a controller running on its own task.
pub struct ControllerHandle {
    command_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<ControllerState>>,
    state_tx: broadcast::Sender<StateChange>,
    events_tx: RadioEventSender,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Get the current state.
    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// A sender for injecting radio events.
    pub fn event_sender(&self) -> RadioEventSender {
        self.events_tx.clone()
    }

    /// See [`BleDeviceController::start`].
    pub async fn start(&self) -> bool {
        self.request(Command::Start).await
    }

    /// See [`BleDeviceController::resume`].
    pub async fn resume(&self) -> bool {
        self.request(Command::Resume).await
    }

    /// See [`BleDeviceController::pause`].
    pub async fn pause(&self) -> bool {
        self.request(Command::Pause).await
    }

    /// See [`BleDeviceController::stop`].
    pub async fn stop(&self) -> bool {
        self.request(Command::Stop).await
    }

    /// Stop the controller task, releasing any connection it holds.
    pub async fn shutdown(self) {
        drop(self.command_tx);
        let _ = self.task.await;
    }

    async fn request(&self, command: fn(oneshot::Sender<bool>) -> Command) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(command(reply_tx)).await.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }
}
