//! Bluetooth Module
//!
//! Provides SPP (RFCOMM serial) communication with the robot.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐
//! │ SppScanner │   │ BluetoothTransport   │
//! │ - bonded   │   │ - connect (bounded)  │
//! │ - inquiry  │   │ - BluetoothSession   │
//! │ - filter   │   │ - read_loop          │
//! └─────┬──────┘   └──────────┬───────────┘
//!       │                     │
//!       └─────────┬───────────┘
//!                 ▼
//!     ┌──────────────────────┐
//!     │ dyn BluetoothAdapter │
//!     └─────┬──────────┬─────┘
//!           ▼          ▼
//!      WinRtAdapter  SerialPortAdapter
//!      (Windows)     (bound tty ports)
//! ```
//!
//! ## Modules
//!
//! - [`adapter`] - platform seam and address helpers
//! - [`scanner`] - robot discovery
//! - [`connection`] - stream ownership and framing

pub mod adapter;
pub mod connection;
pub mod scanner;
#[cfg(not(windows))]
pub mod serial;
#[cfg(test)]
pub mod testing;
#[cfg(windows)]
pub mod winrt;

pub use adapter::BluetoothAdapter;
pub use connection::{BluetoothSession, BluetoothTransport, ConnectionConfig, ListenerExit};
pub use scanner::SppScanner;

use crate::domain::settings::BluetoothSettings;
use std::sync::Arc;

/// The adapter for the platform we were built for
pub fn platform_adapter(settings: &BluetoothSettings) -> Arc<dyn BluetoothAdapter> {
    #[cfg(windows)]
    {
        let _ = settings;
        Arc::new(winrt::WinRtAdapter::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(serial::SerialPortAdapter::new(settings))
    }
}
