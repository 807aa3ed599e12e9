//! Laboratory Instrument Transport Library
//!
//! This crate provides byte-level I/O to laboratory instruments over the
//! transports a measurement rig typically mixes:
//!
//! - **Bus transport**: VISA resource strings (GPIB/USB/Ethernet), behind the
//!   `visa` cargo feature
//! - **Serial**: raw OS serial ports
//! - **Bridge**: a Prologix GPIB-USB adapter that multiplexes many bus
//!   addresses over one serial cable (see [`PrologixBridge`])
//! - **None**: instruments that do their own communication, or none at all
//!
//! Every backend implements [`Transport`]. Writes append the configured
//! terminator; reads strip at most one trailing line terminator.
//!
//! # Example
//!
//! ```rust,no_run
//! use lab_transport::{ResourceId, SystemOpener, TransportKind, TransportOpener, TransportOptions};
//!
//! let opener = SystemOpener;
//! let options = TransportOptions::default().with_baud_rate(9600);
//! let mut port = opener
//!     .open(TransportKind::Serial, &ResourceId::new("/dev/ttyUSB0"), &options)
//!     .unwrap();
//!
//! port.write("*IDN?").unwrap();
//! println!("{}", port.read(None).unwrap());
//! ```

pub mod error;
pub mod null;
pub mod options;
pub mod prologix;
pub mod resource;
pub mod serial;
pub mod visa;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::TransportError;
pub use null::NullTransport;
pub use options::{TransportOptions, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
pub use prologix::{BridgeMode, PrologixBridge, BRIDGE_PRODUCT_ID, DISCOVERY_TIMEOUT};
pub use resource::{ResourceId, GPIB_PREFIX, MAX_BUS_ADDRESS};
pub use serial::SerialTransport;
pub use visa::VisaTransport;

/// IEEE 488.2 identification query, also used as the bus discovery probe
pub const IDN_QUERY: &str = "*IDN?";

/// Identifies which transport an instrument talks over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// VISA-style bus transport addressed by a resource string
    BusTransport,
    /// Raw serial port
    Serial,
    /// Logical address behind the shared Prologix bridge
    Bridge,
    /// No transport; the instrument handles its own I/O
    None,
}

impl TransportKind {
    /// Returns a human-readable name for the transport
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::BusTransport => "VISA",
            TransportKind::Serial => "Serial",
            TransportKind::Bridge => "Prologix",
            TransportKind::None => "None",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte-level I/O to one endpoint
///
/// A transport is exclusively owned by one connection (or, for the bridge
/// link, by the [`PrologixBridge`]). Every blocking call is bounded by the
/// configured timeout.
pub trait Transport: Send {
    /// The kind of this transport
    fn kind(&self) -> TransportKind;

    /// The endpoint this transport was opened on
    fn resource(&self) -> &ResourceId;

    /// Write `payload` followed by the terminator
    fn write(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Read one reply (up to a newline, or `max_bytes` bytes) with the
    /// trailing line terminator stripped
    ///
    /// A timeout with nothing received yields an empty reply.
    fn read(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError>;

    /// Current read timeout
    fn timeout(&self) -> Duration;

    /// Change the read timeout, returning the previous value
    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError>;

    /// Discard pending input/output
    fn clear(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Whether the transport is currently open
    fn is_open(&self) -> bool;

    /// Release the underlying resource; idempotent and never fails
    fn close(&mut self);
}

/// Opens transports by kind
///
/// Connections never construct backends directly; they go through an
/// opener so that simulated transports can be injected.
pub trait TransportOpener: Send + Sync {
    /// Open a transport of `kind` on `resource`
    fn open(
        &self,
        kind: TransportKind,
        resource: &ResourceId,
        options: &TransportOptions,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Opener backed by the real operating system transports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl TransportOpener for SystemOpener {
    fn open(
        &self,
        kind: TransportKind,
        resource: &ResourceId,
        options: &TransportOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match kind {
            TransportKind::Serial => Ok(Box::new(SerialTransport::open(resource, options)?)),
            TransportKind::BusTransport => Ok(Box::new(VisaTransport::open(resource, options)?)),
            TransportKind::None => Ok(Box::new(NullTransport::new(resource.clone(), options))),
            TransportKind::Bridge => Err(TransportError::Unsupported(
                "bridge channels are opened through PrologixBridge".to_string(),
            )),
        }
    }
}

/// Strip at most one trailing line terminator (`\n`, `\r` or `\r\n`)
///
/// Terminator bytes inside the payload are left untouched.
pub fn strip_line_terminator(reply: &str) -> &str {
    let reply = reply.strip_suffix('\n').unwrap_or(reply);
    reply.strip_suffix('\r').unwrap_or(reply)
}

/// Decode raw reply bytes and strip the trailing terminator
pub(crate) fn decode_reply(raw: &[u8]) -> String {
    strip_line_terminator(&String::from_utf8_lossy(raw)).to_string()
}
