//! SPP Scanner Module
//!
//! Handles Bluetooth Classic discovery of robots. Only devices whose name
//! carries the robot family marker are reported.

use crate::domain::error::LinkError;
use crate::domain::models::Device;
use crate::infrastructure::bluetooth::adapter::{matches_marker, BluetoothAdapter, RemoteDevice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inquiry scanner for robots
pub struct SppScanner {
    adapter: Arc<dyn BluetoothAdapter>,
    name_marker: String,
    scanning: AtomicBool,
}

impl SppScanner {
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, name_marker: impl Into<String>) -> Self {
        Self {
            adapter,
            name_marker: name_marker.into(),
            scanning: AtomicBool::new(false),
        }
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    /// Bonded devices that look like robots
    pub fn bonded_robots(&self) -> Result<Vec<Device>, LinkError> {
        let bonded = self.adapter.bonded_devices()?;
        debug!("{} bonded device(s) reported", bonded.len());
        Ok(bonded
            .into_iter()
            .filter_map(|remote| as_robot(remote, &self.name_marker))
            .collect())
    }

    /// Start an inquiry scan
    ///
    /// `on_robot` runs for every matching device the radio reports, possibly
    /// on a platform thread and possibly more than once per device.
    pub fn start<F>(&self, on_robot: F) -> Result<(), LinkError>
    where
        F: Fn(Device) + Send + Sync + 'static,
    {
        self.stop()?;

        info!("Starting Bluetooth scan for '{}' devices", self.name_marker);
        let marker = self.name_marker.clone();
        self.adapter.start_scan(Box::new(move |remote| {
            if let Some(device) = as_robot(remote, &marker) {
                on_robot(device);
            }
        }))?;
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop scanning
    pub fn stop(&self) -> Result<(), LinkError> {
        if self.scanning.swap(false, Ordering::SeqCst) {
            info!("Stopping Bluetooth scan...");
            self.adapter.stop_scan()?;
        }
        Ok(())
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

impl Drop for SppScanner {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop Bluetooth scan: {}", e);
        }
    }
}

fn as_robot(remote: RemoteDevice, marker: &str) -> Option<Device> {
    if !matches_marker(remote.name.as_deref(), marker) {
        return None;
    }
    let name = remote.name.unwrap_or_default();
    Some(Device::bluetooth(remote.address, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::testing::MockAdapter;
    use std::sync::Mutex;

    #[test]
    fn test_bonded_filtered_by_marker() {
        let adapter = MockAdapter::new()
            .with_bonded("00:11:22:33:44:55", Some("ESP32-Bot"))
            .with_bonded("66:77:88:99:AA:BB", Some("Headset"))
            .with_bonded("CC:DD:EE:FF:00:11", None);
        let scanner = SppScanner::new(Arc::new(adapter), "ESP32");

        let robots = scanner.bonded_robots().unwrap();
        assert_eq!(robots, vec![Device::bluetooth("00:11:22:33:44:55", "ESP32-Bot")]);
    }

    #[test]
    fn test_scan_reports_only_robots() {
        let adapter = Arc::new(
            MockAdapter::new()
                .with_scan_result("00:11:22:33:44:55", Some("esp32 rover"))
                .with_scan_result("66:77:88:99:AA:BB", Some("Phone")),
        );
        let scanner = SppScanner::new(adapter.clone(), "ESP32");
        let found = Arc::new(Mutex::new(Vec::new()));

        let sink = found.clone();
        scanner
            .start(move |device| sink.lock().unwrap().push(device))
            .unwrap();
        adapter.emit_found("AA:AA:AA:AA:AA:AA", Some("ESP32-2"));
        adapter.emit_found("BB:BB:BB:BB:BB:BB", None);

        let found = found.lock().unwrap().clone();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "esp32 rover");
        assert_eq!(found[1].address, "AA:AA:AA:AA:AA:AA");
        assert!(scanner.is_scanning());
    }

    #[test]
    fn test_stop_is_idempotent_and_runs_on_drop() {
        let adapter = Arc::new(MockAdapter::new());
        let scanner = SppScanner::new(adapter.clone(), "ESP32");

        scanner.stop().unwrap();
        assert_eq!(adapter.scan_counts(), (0, 0));

        scanner.start(|_| {}).unwrap();
        scanner.start(|_| {}).unwrap();
        assert_eq!(adapter.scan_counts(), (2, 1));

        drop(scanner);
        assert_eq!(adapter.scan_counts(), (2, 2));
    }
}
