//! Connection Controller
//!
//! Owns the link state machine and the one live session.
//!
//! ```text
//!  Disconnected ──start_discovery──▶ Discovering ──stop / timeout──▶ Disconnected
//!  Disconnected | Discovering | Error ──connect──▶ Connecting
//!  Connecting ──ok──▶ Connected        Connecting ──fail──▶ Error
//!  Connected ──disconnect / EOF──▶ Disconnected
//!  Connected ──I/O failure──▶ Error ──acknowledge_error──▶ Disconnected
//! ```
//!
//! Every session carries the epoch it was opened under. `disconnect` bumps
//! the epoch, so a connect that finishes late, or a listener that exits
//! after teardown, finds its epoch stale and leaves the state alone.

use crate::domain::error::LinkError;
use crate::domain::models::{
    AppEvent, Command, ConnectionState, ConnectionStats, ConnectionStatus, Device,
    MessageSeverity, StatusMessage, TelemetryEvent, TransportKind,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{
    connection::read_loop, BluetoothAdapter, BluetoothTransport, ListenerExit, SppScanner,
};
use crate::infrastructure::discovery::DiscoveryService;
use crate::infrastructure::protocol::{self, HttpRequest, WireFrame};
use crate::infrastructure::transport::{Delivery, Session, Transports};
use crate::infrastructure::wifi::client::STATUS_PATH;
use crate::infrastructure::wifi::{Exchange, SubnetSweep, WifiTransport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long teardown waits for a listener to notice its socket closed
const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const EVENT_CAPACITY: usize = 256;

struct ActiveSession {
    epoch: u64,
    device: Device,
    session: Session,
    listener: Option<JoinHandle<()>>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<AppEvent>,
    session: Mutex<Option<ActiveSession>>,
    epoch: AtomicU64,
    transports: Transports,
    discovery: DiscoveryService,
    max_frame_len: usize,
}

pub struct ConnectionController {
    shared: Arc<Shared>,
}

impl ConnectionController {
    pub fn new(settings: &Settings, adapter: Arc<dyn BluetoothAdapter>) -> Result<Self, LinkError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::default());

        let wifi = Arc::new(WifiTransport::new(&settings.wifi)?);
        let bluetooth = BluetoothTransport::new(Arc::clone(&adapter), (&settings.bluetooth).into());
        let discovery = DiscoveryService::new(
            SppScanner::new(adapter, settings.bluetooth.name_marker.clone()),
            SubnetSweep::new(Arc::clone(&wifi), &settings.wifi),
            settings.bluetooth.scan_timeout(),
            events.clone(),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state,
                events,
                session: Mutex::new(None),
                epoch: AtomicU64::new(0),
                transports: Transports { bluetooth, wifi },
                discovery,
                max_frame_len: settings.bluetooth.max_frame_len,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<AppEvent> {
        self.shared.events.subscribe()
    }

    pub fn devices(&self) -> watch::Receiver<Vec<Device>> {
        self.shared.discovery.devices()
    }

    pub fn bonded_devices(&self) -> Result<Vec<Device>, LinkError> {
        self.shared.discovery.bonded_devices()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats::from(&*self.shared.state.borrow())
    }

    pub fn start_discovery(&self, kind: TransportKind) -> Result<(), LinkError> {
        let shared = &self.shared;
        let mut claimed = false;
        shared.state.send_if_modified(|state| {
            if state.status.is_busy() {
                return false;
            }
            state.status = ConnectionStatus::Discovering;
            state.last_error = None;
            claimed = true;
            true
        });
        if !claimed {
            return Err(LinkError::AlreadyInProgress);
        }

        info!("Starting {} discovery", kind);
        let weak = Arc::downgrade(shared);
        let started = match kind {
            TransportKind::Bluetooth => shared.discovery.start_bluetooth(move |generation| {
                if let Some(shared) = weak.upgrade() {
                    shared.discovery_finished(generation, None);
                }
            }),
            TransportKind::Wifi => {
                shared.discovery.start_wifi(move |generation, found| {
                    if let Some(shared) = weak.upgrade() {
                        shared.discovery_finished(generation, Some(found));
                    }
                });
                Ok(())
            }
        };

        match started {
            Ok(()) => {
                shared.log(format!("Searching for robots over {kind}..."), MessageSeverity::Info);
                Ok(())
            }
            Err(e) => {
                warn!("{} discovery failed to start: {}", kind, e);
                shared.state.send_modify(|state| {
                    if state.status == ConnectionStatus::Discovering {
                        state.status = ConnectionStatus::Disconnected;
                    }
                    state.last_error = Some(e.to_string());
                });
                shared.log(e.to_string(), MessageSeverity::Error);
                Err(e)
            }
        }
    }

    pub fn stop_discovery(&self) {
        self.shared.discovery.stop();
        self.shared.leave_discovering();
    }

    /// Open a session to `device`. Any discovery in progress is cancelled
    /// first. Fails with [`LinkError::AlreadyInProgress`] while another
    /// connect is pending or a session is live.
    pub async fn connect(&self, device: Device) -> Result<(), LinkError> {
        let shared = &self.shared;
        let mut epoch = None;
        shared.state.send_if_modified(|state| {
            if state.status.is_busy() {
                return false;
            }
            epoch = Some(shared.epoch.load(Ordering::SeqCst));
            state.status = ConnectionStatus::Connecting;
            state.active_device = Some(device.clone());
            state.last_error = None;
            state.telemetry = Default::default();
            true
        });
        let Some(epoch) = epoch else {
            warn!("Connect to {} refused: link busy", device.address);
            return Err(LinkError::AlreadyInProgress);
        };

        shared.discovery.stop_and_wait().await;
        shared.discovery.clear();
        shared.log(
            format!("Connecting to {} over {}...", device.name, device.kind),
            MessageSeverity::Info,
        );

        let (session, latency) = match shared.transports.open(&device).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Connect to {} failed: {}", device.address, e);
                shared.fail_if_current(epoch, &e);
                return Err(e);
            }
        };

        let mut slot = shared.session.lock().await;
        if shared.epoch.load(Ordering::SeqCst) != epoch {
            drop(slot);
            info!("Connect to {} was cancelled by disconnect", device.address);
            session.close();
            return Err(LinkError::ConnectFailed("cancelled by disconnect".to_string()));
        }

        let listener = match &session {
            Session::Bluetooth(bt) => {
                let Some(reader) = bt.take_reader() else {
                    drop(slot);
                    session.close();
                    let e = LinkError::ConnectFailed("stream has no read half".to_string());
                    shared.fail_if_current(epoch, &e);
                    return Err(e);
                };
                Some(Shared::spawn_listener(shared, epoch, reader))
            }
            Session::Wifi(_) => None,
        };

        if let Some(stale) = slot.take() {
            warn!("Replacing leftover session to {}", stale.device.address);
            stale.session.close();
        }
        *slot = Some(ActiveSession {
            epoch,
            device: device.clone(),
            session,
            listener,
        });
        shared.state.send_modify(|state| {
            state.status = ConnectionStatus::Connected;
            state.latency.record(latency);
        });
        drop(slot);

        info!("Connected to {} ({}) in {:?}", device.name, device.address, latency);
        shared.log(format!("Connected to {}", device.name), MessageSeverity::Success);
        Ok(())
    }

    /// Encode and send `command` on the live session
    pub async fn send(&self, command: Command) -> Result<(), LinkError> {
        self.shared.dispatch(Outbound::Command(command)).await
    }

    /// Pull `GET /status` from a WiFi robot
    pub async fn poll_status(&self) -> Result<(), LinkError> {
        self.shared.dispatch(Outbound::StatusPoll).await
    }

    /// Tear down the session, if any, and land in Disconnected. Safe to
    /// call repeatedly and from any state.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.epoch.fetch_add(1, Ordering::SeqCst);
        shared.discovery.stop_and_wait().await;

        let active = shared.session.lock().await.take();
        shared.state.send_modify(|state| {
            state.status = ConnectionStatus::Disconnected;
            state.active_device = None;
            state.last_error = None;
        });

        if let Some(active) = active {
            info!("Disconnecting from {}", active.device.address);
            release(active).await;
            shared.log("Disconnected", MessageSeverity::Info);
        }
    }

    /// Clear an Error so the caller can retry. Returns false if there was
    /// no error to clear.
    pub fn acknowledge_error(&self) -> bool {
        self.shared.state.send_if_modified(|state| {
            if !matches!(state.status, ConnectionStatus::Error(_)) {
                return false;
            }
            state.status = ConnectionStatus::Disconnected;
            state.active_device = None;
            state.last_error = None;
            true
        })
    }

    /// Stop discovery and release everything
    pub async fn shutdown(&self) {
        info!("Shutting down connection controller");
        self.disconnect().await;
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        let shared = &self.shared;
        shared.epoch.fetch_add(1, Ordering::SeqCst);
        shared.discovery.stop();
        if let Ok(mut slot) = shared.session.try_lock() {
            if let Some(active) = slot.take() {
                debug!("Releasing session to {} on drop", active.device.address);
                active.session.close();
            }
        }
    }
}

enum Outbound {
    Command(Command),
    StatusPoll,
}

impl Shared {
    fn log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.events.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    fn leave_discovering(&self) {
        self.state.send_if_modified(|state| {
            if state.status != ConnectionStatus::Discovering {
                return false;
            }
            state.status = ConnectionStatus::Disconnected;
            true
        });
    }

    fn discovery_finished(&self, generation: u64, found: Option<usize>) {
        if !self.discovery.finish(generation) {
            return;
        }
        self.leave_discovering();
        match found {
            Some(count) => self.log(format!("Sweep finished: {count} robot(s) found"), MessageSeverity::Info),
            None => self.log("Bluetooth scan finished", MessageSeverity::Info),
        }
    }

    /// Connecting -> Error, unless a disconnect got there first
    fn fail_if_current(&self, epoch: u64, err: &LinkError) {
        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            state.status = ConnectionStatus::Error(err.to_string());
            state.last_error = Some(err.to_string());
            true
        });
        self.log(err.to_string(), MessageSeverity::Error);
    }

    async fn dispatch(&self, outbound: Outbound) -> Result<(), LinkError> {
        let mut slot = self.session.lock().await;
        let Some(active) = slot.as_ref().filter(|_| self.state.borrow().is_connected()) else {
            debug!("Send refused: not connected");
            return Err(LinkError::NotConnected);
        };

        let kind = active.session.kind();
        let frame = match outbound {
            Outbound::Command(command) => protocol::encode(&command, kind)?,
            Outbound::StatusPoll => match kind {
                TransportKind::Wifi => WireFrame::Http(HttpRequest::get(STATUS_PATH)),
                TransportKind::Bluetooth => {
                    return Err(LinkError::Unsupported {
                        command: "StatusPoll",
                        transport: kind,
                    })
                }
            },
        };

        let result = active.session.send(&frame).await;
        match result {
            Ok(Delivery::Written) => {
                debug!("Sent {}", frame.to_string().trim_end());
                self.state.send_modify(|state| {
                    state.last_message = format!("Sent: {}", frame.to_string().trim_end());
                });
                Ok(())
            }
            Ok(Delivery::Answered(exchange)) => self.on_answer(&frame, exchange),
            Err(e) if e.is_terminal() => {
                error!("Link failed while sending: {}", e);
                // Under the slot lock, so a racing disconnect always writes last
                let active = slot.take();
                if active.as_ref().map(|a| a.epoch) == Some(self.epoch.load(Ordering::SeqCst)) {
                    self.state.send_modify(|state| {
                        state.status = ConnectionStatus::Error(e.to_string());
                        state.last_error = Some(e.to_string());
                    });
                }
                drop(slot);
                self.log(e.to_string(), MessageSeverity::Error);
                if let Some(active) = active {
                    release(active).await;
                }
                Err(e)
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                Err(e)
            }
        }
    }

    fn on_answer(&self, frame: &WireFrame, exchange: Exchange) -> Result<(), LinkError> {
        let request = match frame {
            WireFrame::Http(request) => format!("{} {}", request.method, request.path),
            WireFrame::Line(line) => line.trim_end().to_string(),
        };
        let outcome = exchange.clone().into_result();
        self.state.send_modify(|state| {
            state.latency.record(exchange.latency);
            state.last_message = format!("{request}: {}", exchange.body);
            if let Err(e) = &outcome {
                state.last_error = Some(e.to_string());
            }
        });
        if !exchange.body.is_empty() {
            let _ = self.events.send(AppEvent::Telemetry(TelemetryEvent::RawMessage {
                text: exchange.body.clone(),
            }));
        }
        if let Err(e) = &outcome {
            warn!("{} rejected: {}", request, e);
        }
        outcome.map(|_| ())
    }

    fn spawn_listener(
        this: &Arc<Self>,
        epoch: u64,
        reader: Box<dyn std::io::Read + Send>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(this);
        let max_frame_len = this.max_frame_len;
        tokio::task::spawn_blocking(move || {
            debug!("Listener for epoch {} started", epoch);
            let exit = read_loop(reader, max_frame_len, |frame| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_frame(epoch, frame);
                }
            });
            debug!("Listener for epoch {} stopped: {:?}", epoch, exit);
            if let Some(shared) = Weak::upgrade(&weak) {
                shared.on_listener_exit(epoch, exit);
            }
        })
    }

    fn on_frame(&self, epoch: u64, frame: Result<String, LinkError>) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropped inbound frame: {}", e);
                return;
            }
        };

        let event = protocol::parse(&text);
        self.state.send_modify(|state| {
            state.last_message = format!("Received: {text}");
            match &event {
                TelemetryEvent::SensorReading { sensor_type, value } => {
                    state
                        .telemetry
                        .sensors
                        .insert(sensor_type.clone(), value.clone());
                }
                TelemetryEvent::StatusUpdate { key, value } => {
                    state.telemetry.status.insert(key.clone(), value.clone());
                }
                TelemetryEvent::ErrorEvent { message } => {
                    state.last_error = Some(message.clone());
                }
                TelemetryEvent::RawMessage { .. } => {}
            }
        });
        if let TelemetryEvent::ErrorEvent { message } = &event {
            warn!("Robot reported error: {}", message);
        }
        let _ = self.events.send(AppEvent::Telemetry(event));
    }

    /// Runs on the listener's blocking thread once its loop ends
    fn on_listener_exit(&self, epoch: u64, exit: ListenerExit) {
        let active = {
            let mut slot = self.session.blocking_lock();
            if slot.as_ref().map(|a| a.epoch) != Some(epoch)
                || self.epoch.load(Ordering::SeqCst) != epoch
            {
                return;
            }
            self.state.send_modify(|state| match &exit {
                ListenerExit::Closed => {
                    state.status = ConnectionStatus::Disconnected;
                    state.active_device = None;
                }
                ListenerExit::Failed(e) => {
                    state.status = ConnectionStatus::Error(e.to_string());
                    state.last_error = Some(e.to_string());
                }
            });
            slot.take()
        };

        match &exit {
            ListenerExit::Closed => {
                info!("Robot closed the connection");
                self.log("Robot closed the connection", MessageSeverity::Warning);
            }
            ListenerExit::Failed(e) => {
                error!("Listener failed: {}", e);
                self.log(e.to_string(), MessageSeverity::Error);
            }
        }

        if let Some(active) = active {
            active.session.close();
        }
    }
}

/// Close the link and wait for its listener to wind down
async fn release(active: ActiveSession) {
    active.session.close();
    let Some(listener) = active.listener else {
        return;
    };
    match tokio::time::timeout(LISTENER_JOIN_TIMEOUT, listener).await {
        Ok(Ok(())) => debug!("Listener for {} joined", active.device.address),
        Ok(Err(e)) => warn!("Listener for {} panicked: {}", active.device.address, e),
        Err(_) => warn!(
            "Listener for {} still running after {:?}",
            active.device.address, LISTENER_JOIN_TIMEOUT
        ),
    }
}
