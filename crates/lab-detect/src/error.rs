//! Error types for port discovery

use lab_transport::TransportError;
use thiserror::Error;

/// Errors that can occur during discovery
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Failed to open a candidate port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Transport error while talking to a bridge or bus
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<serialport::Error> for DetectError {
    fn from(e: serialport::Error) -> Self {
        DetectError::EnumerationFailed(e.to_string())
    }
}
