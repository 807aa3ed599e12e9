//! Error types for the hub

use lab_detect::DetectError;
use lab_transport::{ResourceId, TransportError};
use thiserror::Error;

/// Errors that can occur in the hub
#[derive(Debug, Error)]
pub enum HubError {
    /// No driver registered under this name
    #[error("unknown instrument type: {0}")]
    UnknownInstrument(String),

    /// A bridge-routed instrument was requested but no bridge could be set up
    #[error("Prologix bridge unavailable: {0}")]
    BridgeUnavailable(String),

    /// Transport error while connecting
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Port discovery error
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// Nothing is registered at this port
    #[error("no instrument connected at {0}")]
    NotConnected(ResourceId),
}

/// A single command that failed against live hardware
///
/// Recovered locally: the caller gets a [`Reply::Failed`](crate::Reply::Failed)
/// and the connection stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{instrument}: command {command:?} failed: {reason}")]
pub struct CommandFault {
    /// The command text that was sent
    pub command: String,
    /// Id of the instrument it was sent to
    pub instrument: String,
    /// What went wrong
    pub reason: String,
}
