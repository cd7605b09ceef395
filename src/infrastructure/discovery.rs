//! Device discovery over both links.
//!
//! Results land in a watch channel deduplicated by address; each first
//! sighting is also published as [`AppEvent::DeviceFound`]. Only one
//! discovery runs at a time and starting one clears the previous results.

use crate::domain::error::LinkError;
use crate::domain::models::{AppEvent, Device, TransportKind};
use crate::infrastructure::bluetooth::SppScanner;
use crate::infrastructure::wifi::SubnetSweep;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long [`DiscoveryService::stop_and_wait`] waits for a sweep to drain
const STOP_WAIT: Duration = Duration::from_secs(2);

struct Running {
    generation: u64,
    kind: TransportKind,
    task: JoinHandle<()>,
    // Dropping this cancels a sweep
    cancel: Option<oneshot::Sender<()>>,
}

pub struct DiscoveryService {
    scanner: SppScanner,
    sweep: Arc<SubnetSweep>,
    devices: Arc<watch::Sender<Vec<Device>>>,
    events: broadcast::Sender<AppEvent>,
    scan_timeout: Duration,
    running: Mutex<Option<Running>>,
    generation: AtomicU64,
}

impl DiscoveryService {
    pub fn new(
        scanner: SppScanner,
        sweep: SubnetSweep,
        scan_timeout: Duration,
        events: broadcast::Sender<AppEvent>,
    ) -> Self {
        let (devices, _) = watch::channel(Vec::new());
        Self {
            scanner,
            sweep: Arc::new(sweep),
            devices: Arc::new(devices),
            events,
            scan_timeout,
            running: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn devices(&self) -> watch::Receiver<Vec<Device>> {
        self.devices.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.borrow().clone()
    }

    pub fn clear(&self) {
        self.devices.send_modify(Vec::clear);
    }

    pub fn is_discovering(&self) -> bool {
        self.running().is_some()
    }

    /// Bonded robots, without scanning
    pub fn bonded_devices(&self) -> Result<Vec<Device>, LinkError> {
        if !self.scanner.is_available() {
            return Err(LinkError::NotAvailable(TransportKind::Bluetooth));
        }
        self.scanner.bonded_robots()
    }

    /// Bonded robots first, then whatever the inquiry scan reports until
    /// `scan_timeout` elapses. `on_finished` runs with this discovery's
    /// generation when the timeout fires; pass it to [`Self::finish`].
    pub fn start_bluetooth<F>(&self, on_finished: F) -> Result<(), LinkError>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.stop();
        self.clear();

        if !self.scanner.is_available() {
            warn!("Bluetooth adapter is missing or switched off");
            return Err(LinkError::NotAvailable(TransportKind::Bluetooth));
        }

        match self.scanner.bonded_robots() {
            Ok(bonded) => {
                for device in bonded {
                    merge(&self.devices, &self.events, device);
                }
            }
            Err(e) => warn!("Could not list bonded devices: {}", e),
        }

        let devices = Arc::clone(&self.devices);
        let events = self.events.clone();
        self.scanner
            .start(move |device| merge(&devices, &events, device))?;

        let mut running = self.running();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout = self.scan_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            info!("Bluetooth scan finished after {:?}", timeout);
            on_finished(generation);
        });
        *running = Some(Running {
            generation,
            kind: TransportKind::Bluetooth,
            task,
            cancel: None,
        });
        Ok(())
    }

    /// Sweep the configured subnets in the background. Results are
    /// published once the sweep resolves, then `on_finished` runs with the
    /// generation and the number of robots found.
    pub fn start_wifi<F>(&self, on_finished: F)
    where
        F: FnOnce(u64, usize) + Send + 'static,
    {
        self.stop();
        self.clear();

        let mut running = self.running();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sweep = Arc::clone(&self.sweep);
        let devices = Arc::clone(&self.devices);
        let events = self.events.clone();
        let (cancel, cancelled) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let cancelled = async move {
                let _ = cancelled.await;
            };
            let Some(found) = sweep.run_until(cancelled).await else {
                return;
            };
            let count = found.len();
            for device in found {
                merge(&devices, &events, device);
            }
            on_finished(generation, count);
        });
        *running = Some(Running {
            generation,
            kind: TransportKind::Wifi,
            task,
            cancel: Some(cancel),
        });
    }

    /// Cancel whatever is running. Returns false if nothing was. A sweep
    /// winds down in the background; use [`Self::stop_and_wait`] to be sure
    /// its probes are gone.
    pub fn stop(&self) -> bool {
        self.cancel().is_some()
    }

    /// Cancel whatever is running and wait for its task to end
    pub async fn stop_and_wait(&self) -> bool {
        let Some(task) = self.cancel() else {
            return false;
        };
        match tokio::time::timeout(STOP_WAIT, task).await {
            Ok(Ok(())) => debug!("Discovery task ended"),
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => warn!("Discovery task panicked: {}", e),
            Err(_) => warn!("Discovery task still running after {:?}", STOP_WAIT),
        }
        true
    }

    fn cancel(&self) -> Option<JoinHandle<()>> {
        let mut running = self.running().take()?;
        match running.cancel.take() {
            Some(cancel) => drop(cancel),
            None => running.task.abort(),
        }
        self.wind_down(&running);
        info!("{} discovery stopped", running.kind);
        Some(running.task)
    }

    /// Called when discovery `generation` ends on its own. Returns false if
    /// it had already been stopped or replaced.
    pub fn finish(&self, generation: u64) -> bool {
        let mut slot = self.running();
        if slot.as_ref().map(|r| r.generation) != Some(generation) {
            return false;
        }
        if let Some(running) = slot.take() {
            drop(slot);
            self.wind_down(&running);
        }
        true
    }

    fn wind_down(&self, running: &Running) {
        if running.kind == TransportKind::Bluetooth {
            if let Err(e) = self.scanner.stop() {
                warn!("Failed to stop Bluetooth scan: {}", e);
            }
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn merge(devices: &watch::Sender<Vec<Device>>, events: &broadcast::Sender<AppEvent>, device: Device) {
    let added = devices.send_if_modified(|list| {
        if list.iter().any(|d| d.address == device.address) {
            false
        } else {
            list.push(device.clone());
            true
        }
    });
    if added {
        debug!("Found {} ({})", device.name, device.address);
        let _ = events.send(AppEvent::DeviceFound(device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settings::WifiSettings;
    use crate::infrastructure::bluetooth::testing::MockAdapter;
    use crate::infrastructure::wifi::WifiTransport;
    use tokio::sync::oneshot;

    fn service(adapter: Arc<MockAdapter>, wifi: WifiSettings, scan_timeout: Duration) -> DiscoveryService {
        let (events, _) = broadcast::channel(64);
        let transport = Arc::new(WifiTransport::new(&wifi).unwrap());
        DiscoveryService::new(
            SppScanner::new(adapter, "ESP32"),
            SubnetSweep::new(transport, &wifi),
            scan_timeout,
            events,
        )
    }

    #[tokio::test]
    async fn test_bluetooth_unions_bonded_and_scanned() {
        let adapter = Arc::new(
            MockAdapter::new()
                .with_bonded("00:00:00:00:00:01", Some("ESP32-A"))
                .with_bonded("00:00:00:00:00:02", Some("Keyboard"))
                .with_scan_result("00:00:00:00:00:01", Some("ESP32-A"))
                .with_scan_result("00:00:00:00:00:03", Some("esp32-b")),
        );
        let discovery = service(adapter.clone(), WifiSettings::default(), Duration::from_secs(60));
        let mut events = discovery.events.subscribe();

        discovery.start_bluetooth(|_| {}).unwrap();
        adapter.emit_found("00:00:00:00:00:04", Some("Speaker"));
        adapter.emit_found("00:00:00:00:00:03", Some("esp32-b"));

        let addresses: Vec<String> = discovery.snapshot().into_iter().map(|d| d.address).collect();
        assert_eq!(addresses, vec!["00:00:00:00:00:01", "00:00:00:00:00:03"]);
        assert!(discovery.is_discovering());

        let mut found = 0;
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, AppEvent::DeviceFound(_)));
            found += 1;
        }
        assert_eq!(found, 2);

        assert!(discovery.stop());
        assert!(!discovery.stop());
        assert_eq!(adapter.scan_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_new_scan_clears_previous_results() {
        let adapter = Arc::new(MockAdapter::new());
        let discovery = service(adapter.clone(), WifiSettings::default(), Duration::from_secs(60));

        discovery.start_bluetooth(|_| {}).unwrap();
        adapter.emit_found("00:00:00:00:00:09", Some("ESP32"));
        assert_eq!(discovery.snapshot().len(), 1);

        discovery.start_bluetooth(|_| {}).unwrap();
        assert!(discovery.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_adapter() {
        let adapter = Arc::new(MockAdapter::new().unavailable());
        let discovery = service(adapter, WifiSettings::default(), Duration::from_secs(60));

        assert_eq!(
            discovery.start_bluetooth(|_| {}),
            Err(LinkError::NotAvailable(TransportKind::Bluetooth))
        );
        assert!(!discovery.is_discovering());
        assert!(discovery.bonded_devices().is_err());
    }

    #[tokio::test]
    async fn test_scan_timeout_reports_generation() {
        let adapter = Arc::new(MockAdapter::new());
        let discovery = service(adapter.clone(), WifiSettings::default(), Duration::from_millis(20));
        let (tx, rx) = oneshot::channel();

        discovery
            .start_bluetooth(move |generation| {
                let _ = tx.send(generation);
            })
            .unwrap();
        let generation = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();

        assert!(discovery.finish(generation));
        assert!(!discovery.finish(generation));
        assert!(!discovery.is_discovering());
        assert_eq!(adapter.scan_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_stopped_sweep_never_reports() {
        let wifi = WifiSettings {
            sweep_subnets: vec!["127.0.0".into()],
            sweep_first_host: 1,
            sweep_last_host: 1,
            port: 9,
            ..WifiSettings::default()
        };
        let discovery = service(Arc::new(MockAdapter::new()), wifi, Duration::from_secs(60));
        let (tx, mut rx) = oneshot::channel();

        discovery.start_wifi(move |generation, _| {
            let _ = tx.send(generation);
        });
        assert!(discovery.stop());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(discovery.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_wait_drains_sweep() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/ping"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let wifi = WifiSettings {
            sweep_subnets: vec!["127.0.0".into()],
            sweep_first_host: 1,
            sweep_last_host: 1,
            port: server.address().port(),
            ..WifiSettings::default()
        };
        let discovery = service(Arc::new(MockAdapter::new()), wifi, Duration::from_secs(60));
        let (tx, mut rx) = oneshot::channel();

        discovery.start_wifi(move |generation, _| {
            let _ = tx.send(generation);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        assert!(discovery.stop_and_wait().await);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!discovery.stop_and_wait().await);

        // Long enough for the robot to have answered the abandoned probe
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert!(discovery.snapshot().is_empty());
    }
}
