//! WiFi Module
//!
//! - [`client`] - HTTP session and liveness probe
//! - [`scanner`] - concurrent subnet sweep

pub mod client;
pub mod scanner;

pub use client::{Exchange, WifiSession, WifiTransport};
pub use scanner::SubnetSweep;
