//! Line-oriented operator console.
//!
//! Reads commands from stdin and prints state changes, telemetry and log
//! messages as the controller publishes them. Type `help` for the command
//! list.

use crate::domain::error::LinkError;
use crate::domain::models::{
    AppEvent, Command, ConnectionState, ConnectionStats, Device, Direction, MessageSeverity,
    ParamValue, TelemetryEvent, TransportKind,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::controller::ConnectionController;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const HELP: &str = "\
Commands:
  scan bt|wifi              start discovery
  stop                      stop discovery
  devices                   list discovered robots
  bonded                    list bonded robots
  connect <index|address>   connect over Bluetooth
  wifi [host:port]          connect over WiFi
  disconnect                close the link
  ack                       clear an error
  move <F|B|L|R|S> <speed>  drive
  motor <left> <right>      raw motor speeds
  led <r> <g> <b>           set the LED colour
  sensors                   request all sensor readings
  status                    pull /status (WiFi)
  cmd <name> [k=v ...]      custom command (WiFi)
  raw <text>                raw line (Bluetooth)
  state | stats             show link state
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Index(usize),
    Address(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Nothing,
    Scan(TransportKind),
    Stop,
    Devices,
    Bonded,
    Connect(Target),
    Wifi(Option<(String, u16)>),
    Disconnect,
    Acknowledge,
    Send(Command),
    PollStatus,
    State,
    Stats,
    Help,
    Quit,
}

pub fn parse_line(line: &str) -> Result<ConsoleAction, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let action = match word.to_lowercase().as_str() {
        "" => ConsoleAction::Nothing,
        "scan" => match args.as_slice() {
            [mode] => match mode.to_lowercase().as_str() {
                "bt" | "bluetooth" => ConsoleAction::Scan(TransportKind::Bluetooth),
                "wifi" => ConsoleAction::Scan(TransportKind::Wifi),
                _ => return Err("usage: scan bt|wifi".into()),
            },
            _ => return Err("usage: scan bt|wifi".into()),
        },
        "stop" => ConsoleAction::Stop,
        "devices" => ConsoleAction::Devices,
        "bonded" => ConsoleAction::Bonded,
        "connect" => match args.as_slice() {
            [target] => match target.parse::<usize>() {
                Ok(index) => ConsoleAction::Connect(Target::Index(index)),
                Err(_) => ConsoleAction::Connect(Target::Address(target.to_string())),
            },
            _ => return Err("usage: connect <index|address>".into()),
        },
        "wifi" => match args.as_slice() {
            [] => ConsoleAction::Wifi(None),
            [endpoint] => ConsoleAction::Wifi(Some(parse_endpoint(endpoint)?)),
            _ => return Err("usage: wifi [host:port]".into()),
        },
        "disconnect" => ConsoleAction::Disconnect,
        "ack" => ConsoleAction::Acknowledge,
        "move" => match args.as_slice() {
            [direction, speed] => ConsoleAction::Send(Command::Move {
                direction: direction.parse::<Direction>()?,
                speed: number(speed)?,
            }),
            _ => return Err("usage: move <F|B|L|R|S> <speed>".into()),
        },
        "motor" => match args.as_slice() {
            [left, right] => ConsoleAction::Send(Command::Motor {
                left: number(left)?,
                right: number(right)?,
            }),
            _ => return Err("usage: motor <left> <right>".into()),
        },
        "led" => match args.as_slice() {
            [red, green, blue] => ConsoleAction::Send(Command::Led {
                red: number(red)?,
                green: number(green)?,
                blue: number(blue)?,
            }),
            _ => return Err("usage: led <r> <g> <b>".into()),
        },
        "sensors" => ConsoleAction::Send(Command::SensorRequest),
        "status" => ConsoleAction::PollStatus,
        "cmd" => match args.split_first() {
            Some((name, params)) => ConsoleAction::Send(Command::Custom {
                name: name.to_string(),
                params: parse_params(params)?,
            }),
            None => return Err("usage: cmd <name> [k=v ...]".into()),
        },
        "raw" if !rest.is_empty() => ConsoleAction::Send(Command::Raw {
            text: rest.to_string(),
        }),
        "raw" => return Err("usage: raw <text>".into()),
        "state" => ConsoleAction::State,
        "stats" => ConsoleAction::Stats,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(action)
}

fn number<T: std::str::FromStr>(text: &str) -> Result<T, String> {
    text.parse().map_err(|_| format!("'{text}' is not a valid number"))
}

fn parse_endpoint(text: &str) -> Result<(String, u16), String> {
    match text.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok((host.to_string(), number(port)?)),
        Some(_) => Err(format!("'{text}' has no host")),
        None => Ok((text.to_string(), 80)),
    }
}

fn parse_params(pairs: &[&str]) -> Result<IndexMap<String, ParamValue>, String> {
    let mut params = IndexMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("parameter '{pair}' is not key=value"))?;
        params.insert(key.to_string(), infer_value(value));
    }
    Ok(params)
}

fn infer_value(text: &str) -> ParamValue {
    if let Ok(n) = text.parse::<i64>() {
        ParamValue::Integer(n)
    } else if let Ok(n) = text.parse::<f64>() {
        ParamValue::Float(n)
    } else if let Ok(b) = text.parse::<bool>() {
        ParamValue::Bool(b)
    } else {
        ParamValue::Text(text.to_string())
    }
}

pub fn render_state(state: &ConnectionState) -> String {
    let mut out = format!("[{}]", state.status);
    if let Some(device) = &state.active_device {
        out.push_str(&format!(" {} ({}, {})", device.name, device.address, device.kind));
    }
    if let Some(err) = &state.last_error {
        out.push_str(&format!(" last error: {err}"));
    }
    out
}

pub fn render_stats(stats: &ConnectionStats) -> String {
    let ms = |d: Option<std::time::Duration>| {
        d.map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "connected: {}\ntransport: {}\naddress: {}\nlatency: last {} / avg {}\nlast message: {}\nerror: {}",
        stats.connected,
        stats
            .transport
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string()),
        stats.address.as_deref().unwrap_or("-"),
        ms(stats.last_latency),
        ms(stats.average_latency),
        stats.last_message,
        stats.error.as_deref().unwrap_or("-"),
    )
}

pub fn render_event(event: &AppEvent) -> String {
    match event {
        AppEvent::Telemetry(TelemetryEvent::SensorReading { sensor_type, value }) => {
            format!("sensor {sensor_type} = {value}")
        }
        AppEvent::Telemetry(TelemetryEvent::StatusUpdate { key, value }) => {
            format!("status {key} = {value}")
        }
        AppEvent::Telemetry(TelemetryEvent::ErrorEvent { message }) => {
            format!("robot error: {message}")
        }
        AppEvent::Telemetry(TelemetryEvent::RawMessage { text }) => format!("< {text}"),
        AppEvent::DeviceFound(device) => {
            format!("found {} ({}, {})", device.name, device.address, device.kind)
        }
        AppEvent::LogMessage(status) => {
            let tag = match status.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            format!("{tag}: {}", status.message)
        }
    }
}

fn render_devices(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "no robots found".to_string();
    }
    devices
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{i:>3}  {}  {}  ({})", d.name, d.address, d.kind))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    controller: Arc<ConnectionController>,
    settings: Arc<Mutex<SettingsService>>,
    connecting: Mutex<Option<JoinHandle<()>>>,
}

impl Console {
    pub fn new(controller: Arc<ConnectionController>, settings: Arc<Mutex<SettingsService>>) -> Self {
        Self {
            controller,
            settings,
            connecting: Mutex::new(None),
        }
    }

    /// Read commands until `quit` or end of input, then tear the link down
    pub async fn run(&self) -> anyhow::Result<()> {
        let printer = self.spawn_printer();
        println!("{HELP}");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let action = match parse_line(&line) {
                Ok(action) => action,
                Err(usage) => {
                    println!("{usage}");
                    continue;
                }
            };
            match self.execute(action).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => println!("error: {e}"),
            }
        }

        info!("Console closing");
        self.controller.shutdown().await;
        if let Some(task) = self.connect_task() {
            task.abort();
        }
        printer.abort();
        Ok(())
    }

    fn spawn_printer(&self) -> JoinHandle<()> {
        let mut state_rx = self.controller.subscribe();
        let mut events = self.controller.events();
        tokio::spawn(async move {
            let mut last_status = state_rx.borrow().status.clone();
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = state_rx.borrow_and_update().clone();
                        if state.status != last_status {
                            last_status = state.status.clone();
                            println!("{}", render_state(&state));
                        }
                    }
                    event = events.recv() => match event {
                        Ok(event) => println!("{}", render_event(&event)),
                        Err(RecvError::Lagged(skipped)) => warn!("Console skipped {} event(s)", skipped),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn connect_task(&self) -> Option<JoinHandle<()>> {
        self.connecting.lock().ok().and_then(|mut slot| slot.take())
    }

    async fn execute(&self, action: ConsoleAction) -> Result<Flow, LinkError> {
        match action {
            ConsoleAction::Nothing => {}
            ConsoleAction::Scan(kind) => self.controller.start_discovery(kind)?,
            ConsoleAction::Stop => self.controller.stop_discovery(),
            ConsoleAction::Devices => {
                println!("{}", render_devices(&self.controller.devices().borrow()))
            }
            ConsoleAction::Bonded => println!("{}", render_devices(&self.controller.bonded_devices()?)),
            ConsoleAction::Connect(target) => {
                let device = self.resolve(target)?;
                self.spawn_connect(device);
            }
            ConsoleAction::Wifi(endpoint) => {
                let (host, port) = match endpoint {
                    Some(endpoint) => endpoint,
                    None => self.default_wifi(),
                };
                self.spawn_connect(Device::wifi(&host, port));
            }
            ConsoleAction::Disconnect => {
                if let Some(task) = self.connect_task() {
                    task.abort();
                }
                self.controller.disconnect().await;
            }
            ConsoleAction::Acknowledge => {
                if !self.controller.acknowledge_error() {
                    println!("no error to acknowledge");
                }
            }
            ConsoleAction::Send(command) => self.controller.send(command).await?,
            ConsoleAction::PollStatus => self.controller.poll_status().await?,
            ConsoleAction::State => {
                let state = self.controller.state();
                println!("{}", render_state(&state));
                for (sensor, value) in &state.telemetry.sensors {
                    println!("  sensor {sensor} = {value}");
                }
                for (key, value) in &state.telemetry.status {
                    println!("  status {key} = {value}");
                }
                if !state.last_message.is_empty() {
                    println!("  last message: {}", state.last_message);
                }
            }
            ConsoleAction::Stats => println!("{}", render_stats(&self.controller.stats())),
            ConsoleAction::Help => println!("{HELP}"),
            ConsoleAction::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn resolve(&self, target: Target) -> Result<Device, LinkError> {
        let devices = self.controller.devices().borrow().clone();
        match target {
            Target::Index(index) => devices
                .get(index)
                .cloned()
                .ok_or_else(|| LinkError::DeviceNotFound(format!("no device #{index}"))),
            Target::Address(address) => Ok(devices
                .into_iter()
                .find(|d| d.address.eq_ignore_ascii_case(&address))
                .unwrap_or_else(|| Device::bluetooth(address.clone(), address))),
        }
    }

    fn default_wifi(&self) -> (String, u16) {
        match self.settings.lock() {
            Ok(settings) => {
                let wifi = &settings.get().wifi;
                (wifi.host.clone(), wifi.port)
            }
            Err(_) => ("192.168.4.1".to_string(), 80),
        }
    }

    /// Connect in the background so `disconnect` stays usable meanwhile
    fn spawn_connect(&self, device: Device) {
        let controller = Arc::clone(&self.controller);
        let settings = Arc::clone(&self.settings);
        let task = tokio::spawn(async move {
            match controller.connect(device.clone()).await {
                Ok(()) => remember(&settings, &device),
                Err(e) => println!("connect failed: {e}"),
            }
        });
        if let Ok(mut slot) = self.connecting.lock() {
            *slot = Some(task);
        }
    }
}

/// Record a Bluetooth robot we reached so it can be offered next time
fn remember(settings: &Mutex<SettingsService>, device: &Device) {
    if device.kind != TransportKind::Bluetooth {
        return;
    }
    let Ok(mut settings) = settings.lock() else {
        error!("Settings lock poisoned; {} not remembered", device.address);
        return;
    };
    if let Err(e) = settings
        .add_known_address(&device.address)
        .and_then(|_| settings.set_last_connected(&device.address))
    {
        warn!("Could not save {}: {:#}", device.address, e);
    }
}
