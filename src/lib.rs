//! Client-side link to an ESP32 robot over Bluetooth SPP or WiFi HTTP.
//!
//! - [`domain`] - models, errors, settings, motion classification
//! - [`infrastructure`] - wire protocol, transports, discovery, controller
//! - [`presentation`] - operator console

pub mod domain;
pub mod infrastructure;
pub mod presentation;
