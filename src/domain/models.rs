use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which link a device is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Bluetooth,
    Wifi,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth => write!(f, "Bluetooth"),
            Self::Wifi => write!(f, "WiFi"),
        }
    }
}

/// A robot found by discovery (or entered by hand).
///
/// `address` is the Bluetooth MAC / serial port path for Bluetooth devices
/// and `host:port` for WiFi devices. Two devices are the same device when
/// their addresses match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: String,
    pub name: String,
    pub kind: TransportKind,
}

impl Device {
    pub fn bluetooth(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            kind: TransportKind::Bluetooth,
        }
    }

    pub fn wifi(host: &str, port: u16) -> Self {
        Self {
            address: format!("{host}:{port}"),
            name: format!("Robot @ {host}"),
            kind: TransportKind::Wifi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Discovering,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Round-trip figures for WiFi requests and the last handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyMetrics {
    pub last: Option<Duration>,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub total: Duration,
    pub samples: u32,
}

impl LatencyMetrics {
    pub fn record(&mut self, latency: Duration) {
        self.last = Some(latency);
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = Some(self.max.map_or(latency, |m| m.max(latency)));
        self.total += latency;
        self.samples = self.samples.saturating_add(1);
    }

    pub fn average(&self) -> Option<Duration> {
        (self.samples > 0).then(|| self.total / self.samples)
    }
}

/// Latest typed telemetry, keyed by sensor type / status key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub sensors: BTreeMap<String, SensorValue>,
    pub status: BTreeMap<String, String>,
}

/// Observable link state. Only the controller writes it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub active_device: Option<Device>,
    pub last_error: Option<String>,
    pub last_message: String,
    pub latency: LatencyMetrics,
    pub telemetry: TelemetrySnapshot,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_discovering(&self) -> bool {
        self.status == ConnectionStatus::Discovering
    }
}

/// Point-in-time summary for display
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub connected: bool,
    pub transport: Option<TransportKind>,
    pub address: Option<String>,
    pub last_latency: Option<Duration>,
    pub average_latency: Option<Duration>,
    pub last_message: String,
    pub error: Option<String>,
}

impl From<&ConnectionState> for ConnectionStats {
    fn from(state: &ConnectionState) -> Self {
        Self {
            connected: state.is_connected(),
            transport: state.active_device.as_ref().map(|d| d.kind),
            address: state.active_device.as_ref().map(|d| d.address.clone()),
            last_latency: state.latency.last,
            average_latency: state.latency.average(),
            last_message: state.last_message.clone(),
            error: state.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    /// Single-letter code used on the Bluetooth line protocol
    pub fn code(self) -> char {
        match self {
            Self::Forward => 'F',
            Self::Backward => 'B',
            Self::Left => 'L',
            Self::Right => 'R',
            Self::Stop => 'S',
        }
    }

    /// Word used in WiFi JSON bodies
    pub fn word(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f" | "forward" => Ok(Self::Forward),
            "b" | "backward" | "back" => Ok(Self::Backward),
            "l" | "left" => Ok(Self::Left),
            "r" | "right" => Ok(Self::Right),
            "s" | "stop" => Ok(Self::Stop),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Value of a custom command parameter, tagged by runtime kind
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// Anything without a JSON literal form; sent as a quoted string
    Other(String),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Everything the client can ask the robot to do
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move { direction: Direction, speed: i32 },
    Motor { left: i32, right: i32 },
    Led { red: u8, green: u8, blue: u8 },
    SensorRequest,
    Custom {
        name: String,
        params: IndexMap<String, ParamValue>,
    },
    Raw { text: String },
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Move { .. } => "Move",
            Self::Motor { .. } => "Motor",
            Self::Led { .. } => "Led",
            Self::SensorRequest => "SensorRequest",
            Self::Custom { .. } => "Custom",
            Self::Raw { .. } => "Raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Number(f64),
    /// The robot sent something that isn't a number
    Unparsed(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Unparsed(raw) => write!(f, "{raw} (unparsed)"),
        }
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    SensorReading { sensor_type: String, value: SensorValue },
    StatusUpdate { key: String, value: String },
    ErrorEvent { message: String },
    RawMessage { text: String },
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Telemetry(TelemetryEvent),
    DeviceFound(Device),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
