//! The capability surface every driver implements

use lab_transport::{ResourceId, TransportError};

use crate::connection::InstrumentConnection;
use crate::driver::InstrumentMetadata;
use crate::reply::Reply;

/// An instrument the hub can register and poll
///
/// Drivers embed an [`InstrumentConnection`] and expose it through
/// [`connection`](Instrument::connection); every other method has a
/// default that delegates to it. Drivers normally only override
/// [`measure`](Instrument::measure) and, if they need a start-of-run hook,
/// [`initialize`](Instrument::initialize).
pub trait Instrument: Send {
    /// The embedded connection
    fn connection(&self) -> &InstrumentConnection;

    /// The embedded connection, mutably
    fn connection_mut(&mut self) -> &mut InstrumentConnection;

    /// Instrument type name
    fn id(&self) -> &str {
        self.connection().id()
    }

    /// Instrument description
    fn metadata(&self) -> &InstrumentMetadata {
        self.connection().metadata()
    }

    /// Open the transport to `resource`
    fn connect(&mut self, resource: &ResourceId) -> Result<(), TransportError> {
        self.connection_mut().connect(resource)
    }

    /// Close the transport
    fn close(&mut self) {
        self.connection_mut().close()
    }

    /// Read one reply
    fn read(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError> {
        self.connection_mut().read(max_bytes)
    }

    /// Write one command
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.connection_mut().write(command)
    }

    /// Write `command` and read the reply
    fn ask(&mut self, command: &str) -> Reply {
        self.connection_mut().ask(command)
    }

    /// Identification string
    fn identify(&mut self) -> String {
        self.connection_mut().identify()
    }

    /// Called once at the start of a run
    fn initialize(&mut self) {}

    /// Read one value of `channel`
    fn measure(&mut self, _channel: &str) -> Option<f64> {
        None
    }
}
