//! Robot wire protocol
//!
//! - [`codec`] - outbound commands to Bluetooth lines / WiFi requests
//! - [`telemetry`] - inbound frames to typed events

pub mod codec;
pub mod telemetry;

pub use codec::{encode, HttpMethod, HttpRequest, WireFrame};
pub use telemetry::parse;
