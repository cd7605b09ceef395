pub mod bluetooth;
pub mod controller;
pub mod discovery;
pub mod logging;
pub mod protocol;
pub mod transport;
pub mod wifi;
