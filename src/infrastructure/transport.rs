//! Tagged dispatch over the two links.

use crate::domain::error::LinkError;
use crate::domain::models::{Device, TransportKind};
use crate::infrastructure::bluetooth::{BluetoothSession, BluetoothTransport};
use crate::infrastructure::protocol::WireFrame;
use crate::infrastructure::wifi::{Exchange, WifiSession, WifiTransport};
use std::sync::Arc;
use std::time::Duration;

/// Both link factories
pub struct Transports {
    pub bluetooth: BluetoothTransport,
    pub wifi: Arc<WifiTransport>,
}

impl Transports {
    /// Establish a session over whichever link `device` lives on
    pub async fn open(&self, device: &Device) -> Result<(Session, Duration), LinkError> {
        match device.kind {
            TransportKind::Bluetooth => {
                let (session, latency) = self.bluetooth.connect(device).await?;
                Ok((Session::Bluetooth(Arc::new(session)), latency))
            }
            TransportKind::Wifi => {
                let (session, latency) = self.wifi.connect(device).await?;
                Ok((Session::Wifi(session), latency))
            }
        }
    }
}

/// A live link
pub enum Session {
    Bluetooth(Arc<BluetoothSession>),
    Wifi(WifiSession),
}

/// What came back from sending one frame
#[derive(Debug)]
pub enum Delivery {
    /// Line written; replies arrive through the listener
    Written,
    Answered(Exchange),
}

impl Session {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Bluetooth(_) => TransportKind::Bluetooth,
            Self::Wifi(_) => TransportKind::Wifi,
        }
    }

    pub async fn send(&self, frame: &WireFrame) -> Result<Delivery, LinkError> {
        match (self, frame) {
            (Self::Bluetooth(session), WireFrame::Line(line)) => {
                let session = Arc::clone(session);
                let bytes = line.clone().into_bytes();
                tokio::task::spawn_blocking(move || session.write_frame(&bytes))
                    .await
                    .map_err(|e| LinkError::Io(format!("write task failed: {e}")))??;
                Ok(Delivery::Written)
            }
            (Self::Wifi(session), WireFrame::Http(request)) => {
                session.execute(request).await.map(Delivery::Answered)
            }
            _ => Err(LinkError::Protocol(format!(
                "frame '{}' does not belong on {}",
                frame.to_string().trim_end(),
                self.kind()
            ))),
        }
    }

    /// Release the link. WiFi holds nothing open.
    pub fn close(&self) {
        if let Self::Bluetooth(session) = self {
            session.close();
        }
    }
}
