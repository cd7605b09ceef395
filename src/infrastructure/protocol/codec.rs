//! Command encoding for both links.
//!
//! ```text
//! Command          Bluetooth line        WiFi request
//! Move{F,50}       MOVE:F:50\n           POST /move    {"command":"forward","speed":50}
//! Motor{l,r}       MOTOR:l:r\n           POST /motor   {"left_motor":l,"right_motor":r}
//! Led{r,g,b}       LED:r:g:b\n           POST /led     {"red":r,"green":g,"blue":b}
//! SensorRequest    SENSOR:ALL\n          GET  /sensors
//! Custom{n,p}      -                     POST /command {"command":n, ...p}
//! Raw{text}        text\n                -
//! ```

use crate::domain::error::LinkError;
use crate::domain::models::{Command, ParamValue, TransportKind};
use serde_json::{json, Map, Number, Value};
use std::fmt;
use tracing::warn;

pub const SENSOR_ALL: &str = "SENSOR:ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: &'static str,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
            body: None,
        }
    }

    pub fn post(path: &'static str, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path,
            body: Some(body),
        }
    }
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if let Some(body) = &self.body {
            write!(f, " {body}")?;
        }
        Ok(())
    }
}

/// One outbound frame in transport-specific form
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Newline-terminated text line
    Line(String),
    Http(HttpRequest),
}

impl fmt::Display for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(line) => write!(f, "{line}"),
            Self::Http(request) => write!(f, "{request}"),
        }
    }
}

pub fn encode(command: &Command, transport: TransportKind) -> Result<WireFrame, LinkError> {
    match transport {
        TransportKind::Bluetooth => encode_line(command).map(WireFrame::Line),
        TransportKind::Wifi => encode_http(command).map(WireFrame::Http),
    }
}

/// Bluetooth line form, newline included
pub fn encode_line(command: &Command) -> Result<String, LinkError> {
    let body = match command {
        Command::Move { direction, speed } => format!("MOVE:{}:{}", direction.code(), speed),
        Command::Motor { left, right } => format!("MOTOR:{left}:{right}"),
        Command::Led { red, green, blue } => format!("LED:{red}:{green}:{blue}"),
        Command::SensorRequest => SENSOR_ALL.to_string(),
        Command::Raw { text } => {
            let text = text.trim_end_matches(['\r', '\n']);
            if text.contains('\n') {
                return Err(LinkError::Protocol(
                    "raw text must fit on a single line".to_string(),
                ));
            }
            text.to_string()
        }
        Command::Custom { .. } => {
            return Err(LinkError::Unsupported {
                command: command.label(),
                transport: TransportKind::Bluetooth,
            })
        }
    };
    Ok(body + "\n")
}

pub fn encode_http(command: &Command) -> Result<HttpRequest, LinkError> {
    let request = match command {
        Command::Move { direction, speed } => HttpRequest::post(
            "/move",
            json!({ "command": direction.word(), "speed": speed }),
        ),
        Command::Motor { left, right } => HttpRequest::post(
            "/motor",
            json!({ "left_motor": left, "right_motor": right }),
        ),
        Command::Led { red, green, blue } => HttpRequest::post(
            "/led",
            json!({ "red": red, "green": green, "blue": blue }),
        ),
        Command::SensorRequest => HttpRequest::get("/sensors"),
        Command::Custom { name, params } => {
            let mut body = Map::new();
            body.insert("command".to_string(), Value::String(name.clone()));
            for (key, value) in params {
                if key == "command" {
                    warn!("Ignoring custom parameter named 'command' for {}", name);
                    continue;
                }
                body.insert(key.clone(), param_to_json(value));
            }
            HttpRequest::post("/command", Value::Object(body))
        }
        Command::Raw { .. } => {
            return Err(LinkError::Unsupported {
                command: command.label(),
                transport: TransportKind::Wifi,
            })
        }
    };
    Ok(request)
}

fn param_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::Text(text) => Value::String(text.clone()),
        ParamValue::Integer(n) => Value::Number((*n).into()),
        ParamValue::Float(n) => Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(n.to_string())),
        ParamValue::Bool(b) => Value::Bool(*b),
        ParamValue::Other(text) => Value::String(text.clone()),
    }
}
