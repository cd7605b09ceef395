//! HTTP link to the robot's access-point firmware.
//!
//! There is no socket to hold open: a session is just a base URL plus the
//! shared client, and "connect" means the robot answered `GET /ping`.

use crate::domain::error::LinkError;
use crate::domain::models::Device;
use crate::domain::settings::WifiSettings;
use crate::infrastructure::protocol::{HttpMethod, HttpRequest};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const PING_PATH: &str = "/ping";
pub const STATUS_PATH: &str = "/status";

pub struct WifiTransport {
    client: reqwest::Client,
    io_timeout: Duration,
}

impl WifiTransport {
    pub fn new(settings: &WifiSettings) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.io_timeout())
            .no_proxy()
            .build()
            .map_err(|e| LinkError::ConnectFailed(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            io_timeout: settings.io_timeout(),
        })
    }

    /// Session for `device` without touching the network
    pub fn session(&self, device: &Device) -> WifiSession {
        WifiSession {
            client: self.client.clone(),
            base_url: format!("http://{}", device.address),
            io_timeout: self.io_timeout,
        }
    }

    /// Probe `device` and return the session with the probe round trip
    pub async fn connect(&self, device: &Device) -> Result<(WifiSession, Duration), LinkError> {
        info!("Probing {} at {}", device.name, device.address);
        let session = self.session(device);
        let latency = session.probe().await.map_err(|e| match e {
            LinkError::Io(reason) => LinkError::ConnectFailed(reason),
            LinkError::Rejected { status, .. } => {
                LinkError::ConnectFailed(format!("robot answered {PING_PATH} with HTTP {status}"))
            }
            other => other,
        })?;
        Ok((session, latency))
    }
}

/// One answered request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Non-2xx answers become [`LinkError::Rejected`]
    pub fn into_result(self) -> Result<Self, LinkError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LinkError::Rejected {
                status: self.status,
                body: self.body,
            })
        }
    }
}

#[derive(Clone)]
pub struct WifiSession {
    client: reqwest::Client,
    base_url: String,
    io_timeout: Duration,
}

impl WifiSession {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Liveness probe; returns the round trip
    pub async fn probe(&self) -> Result<Duration, LinkError> {
        let exchange = self.execute(&HttpRequest::get(PING_PATH)).await?;
        Ok(exchange.into_result()?.latency)
    }

    /// Send `request` and read the whole answer, whatever its status
    pub async fn execute(&self, request: &HttpRequest) -> Result<Exchange, LinkError> {
        let url = format!("{}{}", self.base_url, request.path);
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => {
                let builder = self.client.post(&url);
                match &request.body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
        };

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        let latency = started.elapsed();

        debug!("{} {} -> {} in {:?}", request.method, url, status, latency);
        Ok(Exchange {
            status,
            body,
            latency,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> LinkError {
        if err.is_timeout() {
            LinkError::Timeout(self.io_timeout)
        } else {
            LinkError::Io(err.to_string())
        }
    }
}
