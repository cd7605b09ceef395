//! SPP Connection Module
//!
//! Opens the RFCOMM stream, owns the socket for the life of a session and
//! runs the blocking line reader.

use crate::domain::error::LinkError;
use crate::domain::models::Device;
use crate::infrastructure::bluetooth::adapter::{
    parse_service_uuid, BluetoothAdapter, SocketCloser, SppStream,
};
use crate::domain::settings::BluetoothSettings;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub service_uuid: String,
    pub connect_timeout: Duration,
    pub max_frame_len: usize,
}

impl From<&BluetoothSettings> for ConnectionConfig {
    fn from(settings: &BluetoothSettings) -> Self {
        Self {
            service_uuid: settings.spp_service_uuid.clone(),
            connect_timeout: settings.connect_timeout(),
            max_frame_len: settings.max_frame_len,
        }
    }
}

pub struct BluetoothTransport {
    adapter: Arc<dyn BluetoothAdapter>,
    config: ConnectionConfig,
}

impl BluetoothTransport {
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, config: ConnectionConfig) -> Self {
        Self { adapter, config }
    }

    pub fn max_frame_len(&self) -> usize {
        self.config.max_frame_len
    }

    /// Open the SPP stream to `device`.
    ///
    /// The platform connect blocks, so it runs on the blocking pool. If the
    /// bound elapses first the late session is dropped (and closed) when the
    /// blocking call eventually returns.
    pub async fn connect(&self, device: &Device) -> Result<(BluetoothSession, Duration), LinkError> {
        if !self.adapter.is_available() {
            return Err(LinkError::NotAvailable(device.kind));
        }
        let service = parse_service_uuid(&self.config.service_uuid)?;

        info!("Connecting to {} ({}) over SPP", device.name, device.address);
        let adapter = Arc::clone(&self.adapter);
        let address = device.address.clone();
        let started = Instant::now();

        let open = tokio::task::spawn_blocking(move || open_session(adapter.as_ref(), &address, service));

        match tokio::time::timeout(self.config.connect_timeout, open).await {
            Ok(Ok(result)) => result.map(|session| (session, started.elapsed())),
            Ok(Err(join_err)) => Err(LinkError::ConnectFailed(format!(
                "connect task failed: {join_err}"
            ))),
            Err(_) => {
                warn!(
                    "SPP connect to {} did not finish within {:?}",
                    device.address, self.config.connect_timeout
                );
                Err(LinkError::Timeout(self.config.connect_timeout))
            }
        }
    }
}

fn open_session(
    adapter: &dyn BluetoothAdapter,
    address: &str,
    service: Uuid,
) -> Result<BluetoothSession, LinkError> {
    let stream = adapter.open_stream(address, service)?;
    debug!("SPP stream open to {}", address);
    Ok(BluetoothSession::new(stream))
}

/// One live RFCOMM connection
pub struct BluetoothSession {
    writer: Mutex<Box<dyn Write + Send>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    closer: Box<dyn SocketCloser>,
    closed: AtomicBool,
}

impl BluetoothSession {
    pub fn new(stream: SppStream) -> Self {
        Self {
            writer: Mutex::new(stream.writer),
            reader: Mutex::new(Some(stream.reader)),
            closer: stream.closer,
            closed: AtomicBool::new(false),
        }
    }

    /// Hand the read half to the listener; only the first caller gets it
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().ok().and_then(|mut reader| reader.take())
    }

    /// Write one complete frame. Callers on other threads wait for the
    /// whole frame to be written and flushed.
    pub fn write_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LinkError::Io("writer lock poisoned".to_string()))?;
        if self.is_closed() {
            return Err(LinkError::Io("socket closed".to_string()));
        }
        writer.write_all(frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Shut the socket. Safe to call any number of times; the platform close
    /// runs once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing SPP socket");
            self.closer.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for BluetoothSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Why a read loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The robot closed the stream
    Closed,
    Failed(LinkError),
}

/// Read newline-terminated frames until the stream ends or fails.
///
/// Frames longer than `max_frame_len` and frames that aren't UTF-8 are
/// reported as `Err(LinkError::Protocol)` and skipped. Blank lines are
/// ignored.
pub fn read_loop<R, F>(reader: R, max_frame_len: usize, mut on_frame: F) -> ListenerExit
where
    R: Read,
    F: FnMut(Result<String, LinkError>),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(max_frame_len.min(4096));
    let limit = max_frame_len as u64 + 1;

    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf);
        match read {
            Ok(0) => return ListenerExit::Closed,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ListenerExit::Failed(e.into()),
        }

        let terminated = buf.last() == Some(&b'\n');
        if !terminated && buf.len() > max_frame_len {
            on_frame(Err(LinkError::Protocol(format!(
                "frame exceeds {max_frame_len} bytes"
            ))));
            match discard_line(&mut reader) {
                Ok(true) => continue,
                Ok(false) => return ListenerExit::Closed,
                Err(e) => return ListenerExit::Failed(e.into()),
            }
        }

        match std::str::from_utf8(&buf) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    on_frame(Ok(text.to_string()));
                }
            }
            Err(_) => on_frame(Err(LinkError::Protocol("frame is not UTF-8".to_string()))),
        }
    }
}

/// Skip to just past the next newline. `Ok(false)` on end of stream.
fn discard_line<R: BufRead>(reader: &mut R) -> io::Result<bool> {
    loop {
        let (found, used) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(false);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(true);
        }
    }
}
