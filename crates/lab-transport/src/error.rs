//! Error types for instrument transports

use thiserror::Error;

/// Errors that can occur while opening or talking over a transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The resource could not be opened (missing device, permissions, ...)
    #[error("failed to connect to {resource}: {reason}")]
    Connection { resource: String, reason: String },

    /// The resource identifier cannot be interpreted by the transport
    #[error("malformed resource identifier: {0}")]
    MalformedResource(String),

    /// Hard I/O fault during a read or write
    #[error("I/O error on {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    /// Serial port error
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device on a bridge port did not identify as the expected adapter
    #[error("port {port} is not a Prologix controller (version reply: {reply:?})")]
    BridgeIdentity { port: String, reply: String },

    /// The shared bridge link is held by another transaction
    #[error("bridge link {0} is busy")]
    BusBusy(String),

    /// The operation is not available for this transport or build
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The transport has been closed or was never opened
    #[error("transport {0} is closed")]
    Closed(String),
}

impl TransportError {
    /// Whether this error must be treated as fatal to the object being constructed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::MalformedResource(_) | TransportError::BridgeIdentity { .. }
        )
    }
}
