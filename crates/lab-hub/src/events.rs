//! Hub notifications
//!
//! The hub publishes every registry change on a broadcast channel (see
//! [`InstrumentHub::subscribe`](crate::InstrumentHub::subscribe)). This is
//! the only coupling point for presentation layers.

use lab_transport::ResourceId;

/// Events emitted by the hub
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A new connection was registered
    InstrumentConnected {
        /// Resolved port
        port: ResourceId,
        /// Instrument type
        instrument: String,
        /// Parameter the new pair measures
        parameter: String,
    },

    /// A pair was added for an already registered instrument
    InstrumentShared {
        port: ResourceId,
        instrument: String,
        parameter: String,
    },

    /// A registration was rejected because the port is bound to another type
    RegistrationConflict {
        /// Port in question
        port: ResourceId,
        /// Type that was requested
        requested: String,
        /// Type already registered there
        existing: String,
    },

    /// A connection was closed and unregistered
    InstrumentDisconnected { port: ResourceId, instrument: String },

    /// The ordered pairs list changed
    ListChanged {
        /// Number of pairs after the change
        pairs: usize,
    },

    /// Every connection was closed and the registry emptied
    Cleared,
}

impl HubEvent {
    /// Port this event concerns, if any
    pub fn port(&self) -> Option<&ResourceId> {
        match self {
            HubEvent::InstrumentConnected { port, .. }
            | HubEvent::InstrumentShared { port, .. }
            | HubEvent::RegistrationConflict { port, .. }
            | HubEvent::InstrumentDisconnected { port, .. } => Some(port),
            HubEvent::ListChanged { .. } | HubEvent::Cleared => None,
        }
    }

    /// Whether the set of open connections changed
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            HubEvent::InstrumentConnected { .. }
                | HubEvent::InstrumentDisconnected { .. }
                | HubEvent::Cleared
        )
    }
}
