use crate::domain::motion::MotionThresholds;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// A serial device already bound to a robot's SPP channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialBinding {
    pub port: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothSettings {
    /// Case-insensitive substring every robot's advertised name contains
    #[serde(default = "default_name_marker")]
    pub name_marker: String,
    #[serde(default = "default_spp_uuid")]
    pub spp_service_uuid: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_bt_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub serial_bindings: Vec<SerialBinding>,
    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
}

impl BluetoothSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            name_marker: default_name_marker(),
            spp_service_uuid: default_spp_uuid(),
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_timeout_ms: default_bt_connect_timeout_ms(),
            max_frame_len: default_max_frame_len(),
            baud_rate: default_baud_rate(),
            serial_bindings: Vec::new(),
            known_addresses: Vec::new(),
            last_connected_address: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_wifi_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// First three octets of each subnet to sweep, e.g. "192.168.4"
    #[serde(default = "default_sweep_subnets")]
    pub sweep_subnets: Vec<String>,
    #[serde(default = "default_sweep_first_host")]
    pub sweep_first_host: u8,
    #[serde(default = "default_sweep_last_host")]
    pub sweep_last_host: u8,
    #[serde(default = "default_sweep_timeout_ms")]
    pub sweep_timeout_ms: u64,
}

impl WifiSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_timeout_ms)
    }
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_wifi_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            sweep_subnets: default_sweep_subnets(),
            sweep_first_host: default_sweep_first_host(),
            sweep_last_host: default_sweep_last_host(),
            sweep_timeout_ms: default_sweep_timeout_ms(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "smartbot_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_name_marker() -> String {
    "ESP32".to_string()
}
fn default_spp_uuid() -> String {
    "00001101-0000-1000-8000-00805F9B34FB".to_string()
}
fn default_scan_timeout_ms() -> u64 {
    12_000
}
fn default_bt_connect_timeout_ms() -> u64 {
    15_000
}
fn default_max_frame_len() -> usize {
    1024
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_host() -> String {
    "192.168.4.1".to_string()
}
fn default_port() -> u16 {
    80
}
fn default_wifi_connect_timeout_ms() -> u64 {
    5_000
}
fn default_io_timeout_ms() -> u64 {
    10_000
}
fn default_sweep_subnets() -> Vec<String> {
    vec![
        "192.168.1".to_string(),
        "192.168.4".to_string(),
        "192.168.0".to_string(),
    ]
}
fn default_sweep_first_host() -> u8 {
    1
}
fn default_sweep_last_host() -> u8 {
    254
}
fn default_sweep_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub bluetooth: BluetoothSettings,
    #[serde(default)]
    pub wifi: WifiSettings,
    /// Read by library users that drive a [`MotionProcessor`] from their
    /// own sensor feed; the console binary has no motion source.
    ///
    /// [`MotionProcessor`]: crate::domain::motion::MotionProcessor
    #[serde(default)]
    pub motion: MotionThresholds,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file; a missing or unreadable file yields defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_else(|e| {
            tracing::debug!("Using default settings ({:#})", e);
            Settings::default()
        });

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("SmartBotLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)
            .with_context(|| format!("writing {}", self.settings_path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_address(&mut self, address: &str) -> anyhow::Result<()> {
        let known = &mut self.settings.bluetooth.known_addresses;
        if !known.iter().any(|a| a == address) {
            known.push(address.to_string());
            self.save()?;
        }
        Ok(())
    }

    pub fn set_last_connected(&mut self, address: &str) -> anyhow::Result<()> {
        self.settings.bluetooth.last_connected_address = Some(address.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "wifi": { "host": "10.0.0.7" } }"#).unwrap();

        let service = SettingsService::with_path(path);
        let settings = service.get();

        assert_eq!(settings.wifi.host, "10.0.0.7");
        assert_eq!(settings.wifi.port, 80);
        assert_eq!(settings.wifi.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.wifi.io_timeout(), Duration::from_secs(10));
        assert_eq!(settings.bluetooth.name_marker, "ESP32");
        assert_eq!(settings.log_settings.rotation, "daily");
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().wifi.sweep_subnets.len(), 3);
    }

    #[test]
    fn test_known_address_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.add_known_address("AA:BB:CC:DD:EE:FF").unwrap();
        service.add_known_address("AA:BB:CC:DD:EE:FF").unwrap();
        service.set_last_connected("AA:BB:CC:DD:EE:FF").unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(
            reloaded.get().bluetooth.known_addresses,
            vec!["AA:BB:CC:DD:EE:FF".to_string()]
        );
        assert_eq!(
            reloaded.get().bluetooth.last_connected_address.as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
    }
}
