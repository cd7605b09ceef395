//! Platform seam for Bluetooth Classic.
//!
//! Everything above this trait is platform independent. A backend only has
//! to list bonded devices, run an inquiry scan and open an RFCOMM stream to
//! the SPP service of one device.

use crate::domain::error::LinkError;
use std::io::{Read, Write};
use uuid::Uuid;

/// A device as reported by the radio, before robot filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    pub address: String,
    pub name: Option<String>,
}

/// Callback for scan results; may be invoked from a platform thread
pub type FoundCallback = Box<dyn Fn(RemoteDevice) + Send + Sync>;

/// Forces the socket shut so a blocked read returns an error
pub trait SocketCloser: Send + Sync {
    fn close(&self);
}

/// An open SPP connection split into its halves
pub struct SppStream {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub closer: Box<dyn SocketCloser>,
}

pub trait BluetoothAdapter: Send + Sync {
    /// Adapter present and powered
    fn is_available(&self) -> bool;

    fn bonded_devices(&self) -> Result<Vec<RemoteDevice>, LinkError>;

    fn start_scan(&self, on_found: FoundCallback) -> Result<(), LinkError>;

    fn stop_scan(&self) -> Result<(), LinkError>;

    /// Blocking connect to `service` on `address`
    fn open_stream(&self, address: &str, service: Uuid) -> Result<SppStream, LinkError>;
}

/// Case-insensitive substring match against the robot family marker
pub fn matches_marker(name: Option<&str>, marker: &str) -> bool {
    match name {
        Some(name) => name.to_lowercase().contains(&marker.to_lowercase()),
        None => false,
    }
}

/// `AA:BB:CC:DD:EE:FF` form of a 48-bit address
pub fn format_address(address: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02X}", (address >> (i * 8)) & 0xFF))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn parse_address(address: &str) -> Option<u64> {
    let parts: Vec<&str> = address.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    parts.iter().try_fold(0u64, |acc, part| {
        if part.len() != 2 {
            return None;
        }
        u8::from_str_radix(part, 16)
            .ok()
            .map(|byte| (acc << 8) | u64::from(byte))
    })
}

pub fn parse_service_uuid(uuid: &str) -> Result<Uuid, LinkError> {
    Uuid::parse_str(uuid)
        .map_err(|e| LinkError::ConnectFailed(format!("invalid SPP service UUID '{uuid}': {e}")))
}
