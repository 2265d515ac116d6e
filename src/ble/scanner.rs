//! Bounded BLE scanning.
//!
//! Wraps the adapter's scan start/stop with a fixed scan window. When the
//! window elapses a [`RadioEvent::ScanWindowElapsed`] is posted on the event
//! channel; the owner decides what to do with it.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::adapter::{RadioAdapter, RadioEvent, RadioEventSender};
use crate::error::{Error, Result};

/// Default scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Scanner with a bounded scan window.
#[derive(Debug)]
pub struct RadioScanner {
    /// Length of the scan window.
    window: Duration,
    /// Incremented on every scan start; stale timer events carry an old value.
    generation: u64,
    /// Whether a scan is running.
    is_scanning: bool,
    /// Handle to the window timer task.
    timer: Option<JoinHandle<()>>,
}

impl RadioScanner {
    /// Create a scanner with the given scan window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: 0,
            is_scanning: false,
            timer: None,
        }
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Generation of the current (or most recent) scan.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Length of the scan window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start a scan and arm the window timer.
    ///
    /// A scan already in progress is restarted with a fresh window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterDisabled`] if the radio is off, or the
    /// adapter's error if the scan cannot be started.
    pub fn start<R: RadioAdapter>(
        &mut self,
        radio: &mut R,
        events: &RadioEventSender,
    ) -> Result<u64> {
        if !radio.is_enabled() {
            return Err(Error::AdapterDisabled);
        }

        if self.is_scanning {
            debug!("Scan already running, restarting window");
            self.stop(radio);
        }

        radio.start_scan(events.clone())?;

        self.generation += 1;
        self.is_scanning = true;
        self.timer = self.arm_timer(events.clone());

        info!(
            "Started BLE scan (generation {}, window {:?})",
            self.generation, self.window
        );

        Ok(self.generation)
    }

    /// Stop scanning and cancel the window timer.
    pub fn stop<R: RadioAdapter>(&mut self, radio: &mut R) {
        self.cancel_timer();

        if !self.is_scanning {
            return;
        }

        info!("Stopping BLE scan (generation {})", self.generation);
        radio.stop_scan();
        self.is_scanning = false;
    }

    /// Handle an elapsed window.
    ///
    /// Returns `true` if the event belonged to the running scan, in which case
    /// scanning has been stopped.
    pub fn on_window_elapsed<R: RadioAdapter>(&mut self, radio: &mut R, generation: u64) -> bool {
        if !self.is_scanning || generation != self.generation {
            debug!(
                "Ignoring stale scan window (event {}, current {})",
                generation, self.generation
            );
            return false;
        }

        self.timer = None;
        radio.stop_scan();
        self.is_scanning = false;
        true
    }

    fn arm_timer(&self, events: RadioEventSender) -> Option<JoinHandle<()>> {
        let generation = self.generation;
        let window = self.window;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move {
                tokio::time::sleep(window).await;
                let _ = events.send(RadioEvent::ScanWindowElapsed { generation });
            })),
            Err(_) => {
                warn!("No async runtime available, scan window will not expire");
                None
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Default for RadioScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_WINDOW)
    }
}

impl Drop for RadioScanner {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::radio_event_channel;
    use crate::ble::sim::SimulatedRadio;

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses() {
        let mut radio = SimulatedRadio::new();
        let (tx, mut rx) = radio_event_channel();
        let mut scanner = RadioScanner::default();

        let generation = scanner.start(&mut radio, &tx).unwrap();
        assert!(scanner.is_scanning());

        tokio::time::sleep(DEFAULT_SCAN_WINDOW + Duration::from_millis(1)).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event, RadioEvent::ScanWindowElapsed { generation });

        assert!(scanner.on_window_elapsed(&mut radio, generation));
        assert!(!scanner.is_scanning());
        assert_eq!(radio.log().scan_stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer() {
        let mut radio = SimulatedRadio::new();
        let (tx, mut rx) = radio_event_channel();
        let mut scanner = RadioScanner::new(Duration::from_secs(1));

        scanner.start(&mut radio, &tx).unwrap();
        scanner.stop(&mut radio);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let mut radio = SimulatedRadio::new();
        let (tx, _rx) = radio_event_channel();
        let mut scanner = RadioScanner::default();

        let first = scanner.start(&mut radio, &tx).unwrap();
        let second = scanner.start(&mut radio, &tx).unwrap();
        assert_ne!(first, second);

        assert!(!scanner.on_window_elapsed(&mut radio, first));
        assert!(scanner.is_scanning());
        assert!(scanner.on_window_elapsed(&mut radio, second));
    }

    #[test]
    fn test_start_fails_when_disabled() {
        let mut radio = SimulatedRadio::new();
        radio.set_enabled(false);
        let (tx, _rx) = radio_event_channel();
        let mut scanner = RadioScanner::default();

        assert!(matches!(
            scanner.start(&mut radio, &tx),
            Err(Error::AdapterDisabled)
        ));
        assert!(!scanner.is_scanning());
        assert_eq!(radio.log().scan_starts, 0);
    }
}
