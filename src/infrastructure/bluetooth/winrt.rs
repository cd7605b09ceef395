//! WinRT backend: Bluetooth Classic inquiry through `DeviceWatcher` and
//! SPP through an RFCOMM `StreamSocket`.
//!
//! All calls here block on the WinRT async operation; callers run them on
//! the blocking pool.

use crate::domain::error::LinkError;
use crate::infrastructure::bluetooth::adapter::{
    format_address, parse_address, BluetoothAdapter, FoundCallback, RemoteDevice, SocketCloser,
    SppStream,
};
use std::io::{self, Read, Write};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{Ref, GUID, HRESULT};
use windows::Devices::Bluetooth::Rfcomm::RfcommServiceId;
use windows::Devices::Bluetooth::{BluetoothAdapter as RadioAdapter, BluetoothDevice, BluetoothError};
use windows::Devices::Enumeration::{DeviceInformation, DeviceWatcher};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;
use windows::Networking::Sockets::StreamSocket;
use windows::Storage::Streams::{DataReader, DataWriter, InputStreamOptions};

const E_ACCESSDENIED: HRESULT = HRESULT(0x8007_0005_u32 as i32);

fn io_error(err: windows::core::Error) -> LinkError {
    if err.code() == E_ACCESSDENIED {
        LinkError::PermissionDenied(err.message().to_string())
    } else {
        LinkError::Io(err.message().to_string())
    }
}

fn connect_error(err: windows::core::Error) -> LinkError {
    if err.code() == E_ACCESSDENIED {
        LinkError::PermissionDenied(err.message().to_string())
    } else {
        LinkError::ConnectFailed(err.message().to_string())
    }
}

#[derive(Default)]
pub struct WinRtAdapter {
    watcher: Mutex<Option<DeviceWatcher>>,
}

impl WinRtAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn radio_on() -> windows::core::Result<bool> {
        let adapter = RadioAdapter::GetDefaultAsync()?.get()?;
        let radio = adapter.GetRadioAsync()?.get()?;
        Ok(radio.State()? == RadioState::On)
    }

    fn describe(info: &DeviceInformation) -> windows::core::Result<RemoteDevice> {
        let device = BluetoothDevice::FromIdAsync(&info.Id()?)?.get()?;
        let name = device.Name()?.to_string();
        Ok(RemoteDevice {
            address: format_address(device.BluetoothAddress()?),
            name: (!name.is_empty()).then_some(name),
        })
    }
}

impl BluetoothAdapter for WinRtAdapter {
    fn is_available(&self) -> bool {
        match Self::radio_on() {
            Ok(on) => on,
            Err(e) => {
                debug!("No usable Bluetooth radio: {}", e.message());
                false
            }
        }
    }

    fn bonded_devices(&self) -> Result<Vec<RemoteDevice>, LinkError> {
        let selector = BluetoothDevice::GetDeviceSelectorFromPairingState(true).map_err(io_error)?;
        let infos = DeviceInformation::FindAllAsyncAqsFilter(&selector)
            .and_then(|op| op.get())
            .map_err(io_error)?;

        let mut devices = Vec::new();
        for i in 0..infos.Size().map_err(io_error)? {
            let info = infos.GetAt(i).map_err(io_error)?;
            match Self::describe(&info) {
                Ok(device) => devices.push(device),
                Err(e) => warn!("Skipping bonded device: {}", e.message()),
            }
        }
        Ok(devices)
    }

    fn start_scan(&self, on_found: FoundCallback) -> Result<(), LinkError> {
        self.stop_scan()?;

        let selector =
            BluetoothDevice::GetDeviceSelectorFromPairingState(false).map_err(io_error)?;
        let watcher = DeviceInformation::CreateWatcherAqsFilter(&selector).map_err(io_error)?;

        let handler = TypedEventHandler::new(
            move |_: Ref<DeviceWatcher>, info: Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    match Self::describe(info) {
                        Ok(device) => on_found(device),
                        Err(e) => debug!("Ignoring inquiry result: {}", e.message()),
                    }
                }
                Ok(())
            },
        );
        watcher.Added(&handler).map_err(io_error)?;
        watcher.Start().map_err(io_error)?;

        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(watcher);
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), LinkError> {
        let watcher = self.watcher.lock().ok().and_then(|mut slot| slot.take());
        if let Some(watcher) = watcher {
            watcher.Stop().map_err(io_error)?;
        }
        Ok(())
    }

    fn open_stream(&self, address: &str, service: Uuid) -> Result<SppStream, LinkError> {
        let raw = parse_address(address)
            .ok_or_else(|| LinkError::DeviceNotFound(format!("malformed address '{address}'")))?;

        let device = BluetoothDevice::FromBluetoothAddressAsync(raw)
            .and_then(|op| op.get())
            .map_err(|_| LinkError::DeviceNotFound(address.to_string()))?;

        let service_id =
            RfcommServiceId::FromUuid(GUID::from_u128(service.as_u128())).map_err(connect_error)?;
        let result = device
            .GetRfcommServicesForIdAsync(&service_id)
            .and_then(|op| op.get())
            .map_err(connect_error)?;
        if result.Error().map_err(connect_error)? != BluetoothError::Success {
            return Err(LinkError::ConnectFailed(format!(
                "SPP service lookup on {address} failed"
            )));
        }
        let services = result.Services().map_err(connect_error)?;
        if services.Size().map_err(connect_error)? == 0 {
            return Err(LinkError::DeviceNotFound(format!(
                "{address} does not offer the SPP service"
            )));
        }
        let rfcomm = services.GetAt(0).map_err(connect_error)?;

        let socket = StreamSocket::new().map_err(connect_error)?;
        socket
            .ConnectAsync(
                &rfcomm.ConnectionHostName().map_err(connect_error)?,
                &rfcomm.ConnectionServiceName().map_err(connect_error)?,
            )
            .and_then(|op| op.get())
            .map_err(connect_error)?;
        info!("RFCOMM socket connected to {}", address);

        let reader = DataReader::CreateDataReader(&socket.InputStream().map_err(io_error)?)
            .map_err(io_error)?;
        reader
            .SetInputStreamOptions(InputStreamOptions::Partial)
            .map_err(io_error)?;
        let writer = DataWriter::CreateDataWriter(&socket.OutputStream().map_err(io_error)?)
            .map_err(io_error)?;

        Ok(SppStream {
            reader: Box::new(SocketReader(reader)),
            writer: Box::new(SocketWriter(writer)),
            closer: Box::new(SocketHandle(socket)),
        })
    }
}

fn to_io(err: windows::core::Error) -> io::Error {
    io::Error::other(err.message().to_string())
}

struct SocketReader(DataReader);

impl Read for SocketReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let want = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let loaded = self.0.LoadAsync(want).and_then(|op| op.get()).map_err(to_io)? as usize;
        if loaded == 0 {
            return Ok(0);
        }
        self.0.ReadBytes(&mut buf[..loaded]).map_err(to_io)?;
        Ok(loaded)
    }
}

struct SocketWriter(DataWriter);

impl Write for SocketWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.WriteBytes(buf).map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.StoreAsync().and_then(|op| op.get()).map_err(to_io)?;
        self.0.FlushAsync().and_then(|op| op.get()).map_err(to_io)?;
        Ok(())
    }
}

struct SocketHandle(StreamSocket);

impl SocketCloser for SocketHandle {
    fn close(&self) {
        if let Err(e) = self.0.Close() {
            warn!("Failed to close RFCOMM socket: {}", e.message());
        }
    }
}
