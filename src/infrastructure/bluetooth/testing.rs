//! In-memory Bluetooth adapter for tests.

use crate::domain::error::LinkError;
use crate::infrastructure::bluetooth::adapter::{
    BluetoothAdapter, FoundCallback, RemoteDevice, SocketCloser, SppStream,
};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct LinkState {
    incoming: VecDeque<u8>,
    eof: bool,
    failure: Option<io::ErrorKind>,
    closed: bool,
    written: Vec<u8>,
    write_failure: Option<io::ErrorKind>,
    close_count: usize,
}

/// Remote end of one mock connection
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<(Mutex<LinkState>, Condvar)>,
    byte_at_a_time: bool,
}

impl MockLink {
    fn with_state<T>(&self, f: impl FnOnce(&mut LinkState) -> T) -> T {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock().unwrap();
        let out = f(&mut state);
        cvar.notify_all();
        out
    }

    /// Robot sends a line (newline appended)
    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{line}\n").as_bytes());
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.with_state(|s| s.incoming.extend(bytes));
    }

    /// Robot closes its end
    pub fn eof(&self) {
        self.with_state(|s| s.eof = true);
    }

    /// Next read fails with `kind`
    pub fn fail(&self, kind: io::ErrorKind) {
        self.with_state(|s| s.failure = Some(kind));
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.with_state(|s| s.write_failure = Some(kind));
    }

    pub fn written(&self) -> String {
        self.with_state(|s| String::from_utf8_lossy(&s.written).into_owned())
    }

    pub fn close_count(&self) -> usize {
        self.with_state(|s| s.close_count)
    }
}

struct MockReader(MockLink);

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.0.state;
        let mut state = lock.lock().unwrap();
        loop {
            if state.closed {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "socket closed"));
            }
            if !state.incoming.is_empty() {
                let n = buf.len().min(state.incoming.len());
                for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if let Some(kind) = state.failure.take() {
                return Err(io::Error::new(kind, "link failure"));
            }
            if state.eof {
                return Ok(0);
            }
            state = cvar.wait(state).unwrap();
        }
    }
}

struct MockWriter(MockLink);

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = if self.0.byte_at_a_time { 1 } else { buf.len() };
        let result = self.0.with_state(|s| {
            if let Some(kind) = s.write_failure {
                return Err(io::Error::new(kind, "write failed"));
            }
            s.written.extend_from_slice(&buf[..n]);
            Ok(n)
        });
        if self.0.byte_at_a_time {
            std::thread::yield_now();
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MockCloser(MockLink);

impl SocketCloser for MockCloser {
    fn close(&self) {
        self.0.with_state(|s| {
            s.closed = true;
            s.close_count += 1;
        });
    }
}

#[derive(Default)]
pub struct MockAdapter {
    unavailable: bool,
    bonded: Vec<RemoteDevice>,
    scan_results: Vec<RemoteDevice>,
    open_failure: Option<LinkError>,
    open_delay: Option<Duration>,
    byte_at_a_time: bool,
    links: Mutex<Vec<MockLink>>,
    on_found: Mutex<Option<FoundCallback>>,
    scans: Mutex<(usize, usize)>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_bonded(mut self, address: &str, name: Option<&str>) -> Self {
        self.bonded.push(remote(address, name));
        self
    }

    pub fn with_scan_result(mut self, address: &str, name: Option<&str>) -> Self {
        self.scan_results.push(remote(address, name));
        self
    }

    pub fn failing_open(mut self, err: LinkError) -> Self {
        self.open_failure = Some(err);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Writers accept one byte per call
    pub fn byte_at_a_time(mut self) -> Self {
        self.byte_at_a_time = true;
        self
    }

    pub fn last_link(&self) -> Option<MockLink> {
        self.links.lock().unwrap().last().cloned()
    }

    pub fn open_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// (started, stopped) scan counts
    pub fn scan_counts(&self) -> (usize, usize) {
        *self.scans.lock().unwrap()
    }

    /// Report a device through the running scan, if any
    pub fn emit_found(&self, address: &str, name: Option<&str>) {
        if let Some(callback) = self.on_found.lock().unwrap().as_ref() {
            callback(remote(address, name));
        }
    }
}

fn remote(address: &str, name: Option<&str>) -> RemoteDevice {
    RemoteDevice {
        address: address.to_string(),
        name: name.map(str::to_string),
    }
}

impl BluetoothAdapter for MockAdapter {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn bonded_devices(&self) -> Result<Vec<RemoteDevice>, LinkError> {
        Ok(self.bonded.clone())
    }

    fn start_scan(&self, on_found: FoundCallback) -> Result<(), LinkError> {
        self.scans.lock().unwrap().0 += 1;
        for device in &self.scan_results {
            on_found(device.clone());
        }
        *self.on_found.lock().unwrap() = Some(on_found);
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), LinkError> {
        self.scans.lock().unwrap().1 += 1;
        self.on_found.lock().unwrap().take();
        Ok(())
    }

    fn open_stream(&self, _address: &str, _service: Uuid) -> Result<SppStream, LinkError> {
        if let Some(delay) = self.open_delay {
            std::thread::sleep(delay);
        }
        if let Some(err) = &self.open_failure {
            return Err(err.clone());
        }
        let link = MockLink {
            byte_at_a_time: self.byte_at_a_time,
            ..MockLink::default()
        };
        self.links.lock().unwrap().push(link.clone());
        Ok(SppStream {
            reader: Box::new(MockReader(link.clone())),
            writer: Box::new(MockWriter(link.clone())),
            closer: Box::new(MockCloser(link)),
        })
    }
}
