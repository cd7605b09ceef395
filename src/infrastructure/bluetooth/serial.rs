//! Serial-port backend for platforms that expose bound RFCOMM channels as
//! tty devices (`/dev/rfcomm0` on Linux, `/dev/cu.<name>` on macOS).
//!
//! The OS has already bound the port to the SPP channel, so the service
//! UUID is not consulted here. Device "addresses" are port paths.

use crate::domain::error::LinkError;
use crate::domain::settings::{BluetoothSettings, SerialBinding};
use crate::infrastructure::bluetooth::adapter::{
    BluetoothAdapter, FoundCallback, RemoteDevice, SocketCloser, SppStream,
};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read timeout; bounds how long a close takes to reach a blocked reader
const READ_POLL: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SerialPortAdapter {
    baud_rate: u32,
    bindings: Vec<SerialBinding>,
}

impl SerialPortAdapter {
    pub fn new(settings: &BluetoothSettings) -> Self {
        Self {
            baud_rate: settings.baud_rate,
            bindings: settings.serial_bindings.clone(),
        }
    }

    fn enumerate(&self) -> Result<Vec<RemoteDevice>, LinkError> {
        let ports = serialport::available_ports()
            .map_err(|e| LinkError::Io(format!("port enumeration failed: {e}")))?;

        let mut devices: Vec<RemoteDevice> = self
            .bindings
            .iter()
            .filter(|binding| Path::new(&binding.port).exists())
            .map(|binding| RemoteDevice {
                address: binding.port.clone(),
                name: Some(binding.name.clone()),
            })
            .collect();

        for port in ports {
            if devices.iter().any(|d| d.address == port.port_name) {
                continue;
            }
            devices.push(RemoteDevice {
                name: Some(port_label(&port.port_name)),
                address: port.port_name,
            });
        }
        Ok(devices)
    }
}

/// `/dev/cu.ESP32-Bot` -> `ESP32-Bot`, `/dev/rfcomm0` -> `rfcomm0`
fn port_label(path: &str) -> String {
    let file = Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    file.strip_prefix("cu.")
        .or_else(|| file.strip_prefix("tty."))
        .map(str::to_string)
        .unwrap_or(file)
}

fn map_open_error(port: &str, err: serialport::Error) -> LinkError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => LinkError::DeviceNotFound(port.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            LinkError::PermissionDenied(format!("{port}: {err}"))
        }
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            LinkError::DeviceNotFound(port.to_string())
        }
        _ => LinkError::ConnectFailed(format!("{port}: {err}")),
    }
}

impl BluetoothAdapter for SerialPortAdapter {
    fn is_available(&self) -> bool {
        serialport::available_ports().is_ok()
    }

    fn bonded_devices(&self) -> Result<Vec<RemoteDevice>, LinkError> {
        self.enumerate()
    }

    fn start_scan(&self, on_found: FoundCallback) -> Result<(), LinkError> {
        // No inquiry on this backend; re-list what the OS has bound
        for device in self.enumerate()? {
            on_found(device);
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), LinkError> {
        Ok(())
    }

    fn open_stream(&self, address: &str, service: Uuid) -> Result<SppStream, LinkError> {
        debug!("Opening {} for service {}", address, service);
        let port = serialport::new(address, self.baud_rate)
            .timeout(READ_POLL)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| map_open_error(address, e))?;

        let mut writer = port
            .try_clone()
            .map_err(|e| LinkError::ConnectFailed(format!("{address}: {e}")))?;
        if let Err(e) = writer.set_timeout(WRITE_TIMEOUT) {
            warn!("Could not set write timeout on {}: {}", address, e);
        }

        info!("Opened {} at {} baud", address, self.baud_rate);
        let closed = Arc::new(AtomicBool::new(false));
        Ok(SppStream {
            reader: Box::new(PollingReader {
                port,
                closed: closed.clone(),
            }),
            writer: Box::new(PortWriter(writer)),
            closer: Box::new(FlagCloser(closed)),
        })
    }
}

/// Turns read timeouts into retries until the session is closed
struct PollingReader {
    port: Box<dyn SerialPort>,
    closed: Arc<AtomicBool>,
}

impl Read for PollingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "port closed"));
            }
            match self.port.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                other => return other,
            }
        }
    }
}

struct PortWriter(Box<dyn SerialPort>);

impl Write for PortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

struct FlagCloser(Arc<AtomicBool>);

impl SocketCloser for FlagCloser {
    fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}
