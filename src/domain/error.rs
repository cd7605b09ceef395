//! Robot link error taxonomy.

use crate::domain::models::TransportKind;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0} is not available")]
    NotAvailable(TransportKind),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("operation already in progress")]
    AlreadyInProgress,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{command} has no wire form over {transport}")]
    Unsupported {
        command: &'static str,
        transport: TransportKind,
    },

    #[error("robot rejected the request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl LinkError {
    /// Errors after which the session can no longer be used
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_))
    }

    /// Map a failure raised while opening a link
    pub fn from_connect(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            io::ErrorKind::NotFound => Self::DeviceNotFound(err.to_string()),
            _ => Self::ConnectFailed(err.to_string()),
        }
    }
}

/// I/O on an open session. Every kind is terminal here, permission
/// failures included; [`LinkError::from_connect`] covers the open path.
impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
