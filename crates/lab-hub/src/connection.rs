//! Per-instrument connection
//!
//! An [`InstrumentConnection`] pairs one transport with the instrument's
//! metadata. Serial and VISA connections own their transport outright;
//! bridge-routed connections hold a handle to the shared
//! [`PrologixBridge`] plus their bus address and never open a port of
//! their own.
//!
//! `ask` never fails: a transport fault becomes a logged
//! [`Reply::Failed`] and the connection stays usable for the next
//! command, so one bad instrument cannot abort a measurement pass.
//!
//! In debug (simulation) mode no I/O happens at all. Writes are dropped,
//! reads are empty and `ask` echoes the command back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lab_transport::{
    PrologixBridge, ResourceId, Transport, TransportError, TransportKind, TransportOpener,
    TransportOptions, IDN_QUERY,
};
use tracing::{debug, info, trace, warn};

use crate::driver::InstrumentMetadata;
use crate::error::CommandFault;
use crate::reply::Reply;

/// Returned by `identify` when the instrument gives no answer
pub const UNKNOWN_INSTRUMENT: &str = "Unknown instrument";

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Uninitialized,
    /// Transport open (or simulated)
    Connected,
    /// Closed after having been connected
    Closed,
}

enum Link {
    None,
    Direct(Box<dyn Transport>),
    Bridge { bridge: PrologixBridge, address: u8 },
}

/// Connection to one instrument
pub struct InstrumentConnection {
    metadata: InstrumentMetadata,
    resource: Option<ResourceId>,
    options: TransportOptions,
    debug: bool,
    last_measurement: BTreeMap<String, f64>,
    opener: Arc<dyn TransportOpener>,
    bridge: Option<PrologixBridge>,
    link: Link,
    state: ConnectionState,
}

impl std::fmt::Debug for InstrumentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentConnection")
            .field("id", &self.metadata.name)
            .field("kind", &self.metadata.transport)
            .field("resource", &self.resource)
            .field("debug", &self.debug)
            .field("state", &self.state)
            .finish()
    }
}

impl InstrumentConnection {
    /// Create an unconnected connection for an instrument type
    pub fn new(metadata: InstrumentMetadata, opener: Arc<dyn TransportOpener>) -> Self {
        Self {
            metadata,
            resource: None,
            options: TransportOptions::default(),
            debug: false,
            last_measurement: BTreeMap::new(),
            opener,
            bridge: None,
            link: Link::None,
            state: ConnectionState::Uninitialized,
        }
    }

    /// Enable simulation mode for the lifetime of this connection
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Transport options used by the next `connect`
    pub fn with_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Bridge used when the instrument is bridge-routed
    pub fn with_bridge(mut self, bridge: PrologixBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Instrument type name
    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    /// Transport kind, fixed at construction
    pub fn kind(&self) -> TransportKind {
        self.metadata.transport
    }

    /// Instrument description
    pub fn metadata(&self) -> &InstrumentMetadata {
        &self.metadata
    }

    /// Resolved resource identifier of the current (or last) connection
    pub fn resource(&self) -> Option<&ResourceId> {
        self.resource.as_ref()
    }

    /// Current transport options
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Write terminator
    pub fn terminator(&self) -> &str {
        &self.options.terminator
    }

    /// Whether this connection is simulated
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is usable for I/O
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Bus address behind the bridge, for bridge-routed connections
    pub fn bus_address(&self) -> Option<u8> {
        match &self.link {
            Link::Bridge { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Most recent value per channel
    pub fn last_measurement(&self) -> &BTreeMap<String, f64> {
        &self.last_measurement
    }

    /// Remember the latest value of `channel`
    pub fn record_measurement(&mut self, channel: &str, value: f64) {
        self.last_measurement.insert(channel.to_string(), value);
    }

    /// Connect using the current options
    pub fn connect(&mut self, resource: &ResourceId) -> Result<(), TransportError> {
        self.close_link();

        let resource = if resource.is_empty() && self.kind() == TransportKind::None {
            ResourceId::new(self.id())
        } else {
            resource.clone()
        };

        if self.debug {
            debug!("{} connected to {} in debug mode", self.id(), resource);
            self.resource = Some(resource);
            self.state = ConnectionState::Connected;
            return Ok(());
        }

        let link = match self.open_link(&resource) {
            Ok(link) => link,
            Err(e) => {
                self.resource = None;
                if self.state == ConnectionState::Connected {
                    self.state = ConnectionState::Closed;
                }
                return Err(e);
            }
        };

        self.link = link;
        self.state = ConnectionState::Connected;
        info!("{} connected to {}", self.id(), resource);
        Ok(())
    }

    fn open_link(&mut self, resource: &ResourceId) -> Result<Link, TransportError> {
        match self.kind() {
            TransportKind::Bridge => {
                let address = resource.bus_address()?;
                let bridge = self.bridge.clone().ok_or_else(|| TransportError::Connection {
                    resource: resource.to_string(),
                    reason: "no Prologix bridge available".to_string(),
                })?;
                bridge.select(address)?;
                self.resource = Some(ResourceId::gpib(address));
                Ok(Link::Bridge { bridge, address })
            }
            kind => {
                let transport = self.opener.open(kind, resource, &self.options)?;
                self.resource = Some(transport.resource().clone());
                Ok(Link::Direct(transport))
            }
        }
    }

    /// Replace the options, then connect
    pub fn connect_with(
        &mut self,
        resource: &ResourceId,
        options: TransportOptions,
    ) -> Result<(), TransportError> {
        self.options = options;
        self.connect(resource)
    }

    fn not_connected(&self) -> TransportError {
        TransportError::Closed(format!(
            "{} ({})",
            self.id(),
            self.resource.as_ref().map(ResourceId::as_str).unwrap_or("not connected")
        ))
    }

    /// Write a command without reading a reply
    pub fn write(&mut self, command: &str) -> Result<(), TransportError> {
        if self.debug {
            trace!("{} (debug) <- {:?}", self.id(), command);
            return Ok(());
        }
        match &mut self.link {
            Link::Direct(transport) => transport.write(command),
            Link::Bridge { bridge, address } => bridge.write_to(*address, command),
            Link::None => Err(self.not_connected()),
        }
    }

    /// Read one reply
    pub fn read(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError> {
        if self.debug {
            return Ok(String::new());
        }
        match &mut self.link {
            Link::Direct(transport) => transport.read(max_bytes),
            Link::Bridge { bridge, address } => bridge.read_from(*address, max_bytes),
            Link::None => Err(self.not_connected()),
        }
    }

    /// Write `command` and read the reply
    pub fn ask(&mut self, command: &str) -> Reply {
        self.ask_limited(command, None)
    }

    /// Write `command` and read at most `max_bytes` of the reply
    pub fn ask_limited(&mut self, command: &str, max_bytes: Option<usize>) -> Reply {
        if self.debug {
            return Reply::Text(command.to_string());
        }

        let result = match &mut self.link {
            Link::Direct(transport) => transport
                .write(command)
                .and_then(|()| transport.read(max_bytes)),
            Link::Bridge { bridge, address } => {
                bridge.transact_limited(*address, command, max_bytes)
            }
            Link::None => Err(self.not_connected()),
        };

        match result {
            Ok(text) => Reply::Text(text),
            Err(e) => {
                warn!("{}: command {:?} failed: {}", self.id(), command, e);
                Reply::Failed(CommandFault {
                    command: command.to_string(),
                    instrument: self.id().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Ask the instrument for its identification string
    pub fn identify(&mut self) -> String {
        if self.debug {
            return self.id().to_string();
        }
        match self.ask(IDN_QUERY) {
            Reply::Text(id) if !id.is_empty() => id,
            _ => UNKNOWN_INSTRUMENT.to_string(),
        }
    }

    /// Discard pending I/O on the device; failures are logged only
    pub fn clear(&mut self) {
        if self.debug {
            return;
        }
        if let Link::Direct(transport) = &mut self.link {
            match transport.clear() {
                Ok(()) => debug!("cleared {}", self.metadata.name),
                Err(e) => debug!("unable to clear {}: {}", self.metadata.name, e),
            }
        }
    }

    /// Current read timeout
    pub fn timeout(&self) -> Duration {
        match &self.link {
            Link::Direct(transport) => transport.timeout(),
            Link::Bridge { bridge, .. } => bridge.timeout(),
            Link::None => self.options.timeout,
        }
    }

    /// Change the read timeout, returning the previous value
    ///
    /// For bridge-routed connections this changes the shared link timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        let previous = match &mut self.link {
            Link::Direct(transport) => transport.set_timeout(timeout)?,
            Link::Bridge { bridge, .. } => bridge.set_timeout(timeout)?,
            Link::None => self.options.timeout,
        };
        self.options.timeout = timeout;
        Ok(previous)
    }

    fn close_link(&mut self) {
        match std::mem::replace(&mut self.link, Link::None) {
            Link::Direct(mut transport) => {
                transport.close();
                debug!("disconnected {}", self.metadata.name);
            }
            Link::Bridge { address, .. } => {
                debug!("released bus address {} for {}", address, self.metadata.name);
            }
            Link::None => {}
        }
    }

    /// Close the connection; idempotent
    ///
    /// A bridge-routed connection releases its address but leaves the
    /// shared link open.
    pub fn close(&mut self) {
        self.close_link();
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for InstrumentConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_sim::{MockDevice, MockOpener, VirtualPrologix};

    fn meta(kind: TransportKind) -> InstrumentMetadata {
        InstrumentMetadata::new("PARO1000", kind).with_channel("PRESSURE", "psi")
    }

    fn serial_connection(opener: &MockOpener) -> InstrumentConnection {
        InstrumentConnection::new(meta(TransportKind::Serial), Arc::new(opener.clone()))
    }

    #[test]
    fn test_reconnect_closes_previous_transport() {
        let opener = MockOpener::new().with_device("COM4", MockDevice::new());
        let device = opener.device("COM4").unwrap();
        let mut conn = serial_connection(&opener);
        let port = ResourceId::new("COM4");

        conn.connect(&port).unwrap();
        conn.connect(&port).unwrap();

        assert_eq!(device.open_count(), 2);
        assert_eq!(device.live_count(), 1);
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.close();
        conn.close();
        assert_eq!(device.live_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_failed_reconnect_leaves_connection_closed() {
        let opener = MockOpener::new().with_device("COM4", MockDevice::new());
        let device = opener.device("COM4").unwrap();
        let mut conn = serial_connection(&opener);

        conn.connect(&ResourceId::new("COM4")).unwrap();
        assert!(conn.connect(&ResourceId::new("COM9")).is_err());

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_connected());
        assert_eq!(conn.resource(), None);
        assert_eq!(device.live_count(), 0);
        assert!(!conn.ask("*IDN?").is_ok());

        conn.connect(&ResourceId::new("COM4")).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.resource(), Some(&ResourceId::new("COM4")));
    }

    #[test]
    fn test_failed_first_connect_stays_uninitialized() {
        let opener = MockOpener::new();
        let mut conn = serial_connection(&opener);

        assert!(conn.connect(&ResourceId::new("COM9")).is_err());
        assert_eq!(conn.state(), ConnectionState::Uninitialized);
        assert_eq!(conn.resource(), None);
    }

    #[test]
    fn test_drop_closes_transport() {
        let opener = MockOpener::new().with_device("COM4", MockDevice::new());
        {
            let mut conn = serial_connection(&opener);
            conn.connect(&ResourceId::new("COM4")).unwrap();
            assert_eq!(opener.live_count(), 1);
        }
        assert_eq!(opener.live_count(), 0);
    }

    #[test]
    fn test_ask_survives_write_fault() {
        let device = MockDevice::new().reply("P?", "14.7");
        let opener = MockOpener::new().with_device("COM4", device.clone());
        let mut conn = serial_connection(&opener);
        conn.connect(&ResourceId::new("COM4")).unwrap();

        device.set_fail_writes(true);
        let reply = conn.ask("P?");
        assert!(reply.as_f64().is_nan());
        assert_eq!(reply.fault().map(|f| f.command.as_str()), Some("P?"));

        device.set_fail_writes(false);
        assert_eq!(conn.ask("P?").as_f64(), 14.7);
    }

    #[test]
    fn test_ask_before_connect_is_a_fault() {
        let opener = MockOpener::new();
        let mut conn = serial_connection(&opener);
        assert!(!conn.ask("P?").is_ok());
        assert!(conn.write("P?").is_err());
    }

    #[test]
    fn test_identify() {
        let opener = MockOpener::new()
            .with_device("COM4", MockDevice::with_idn("Paroscientific,1000,0,1"))
            .with_device("COM5", MockDevice::new());

        let mut conn = serial_connection(&opener);
        conn.connect(&ResourceId::new("COM4")).unwrap();
        assert_eq!(conn.identify(), "Paroscientific,1000,0,1");

        conn.connect(&ResourceId::new("COM5")).unwrap();
        assert_eq!(conn.identify(), UNKNOWN_INSTRUMENT);
    }

    #[test]
    fn test_debug_mode_does_no_io() {
        let opener = MockOpener::new();
        let mut conn = serial_connection(&opener).with_debug(true);

        conn.connect(&ResourceId::new("COM99")).unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.ask("P?"), Reply::Text("P?".to_string()));
        assert_eq!(conn.read(None).unwrap(), "");
        assert_eq!(conn.identify(), "PARO1000");
        assert!(opener.opened().is_empty());
    }

    #[test]
    fn test_none_kind_resolves_to_id() {
        let opener = MockOpener::new().with_device("TIME", MockDevice::new());
        let mut conn = InstrumentConnection::new(
            InstrumentMetadata::new("TIME", TransportKind::None),
            Arc::new(opener),
        );

        conn.connect(&ResourceId::default()).unwrap();
        assert_eq!(conn.resource().map(ResourceId::as_str), Some("TIME"));
    }

    #[test]
    fn test_bridge_connection_routes_through_bridge() {
        let adapter = VirtualPrologix::new().with_reply(12, "KRDG? A", "+077.350");
        let handle = adapter.handle();
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();
        let mut conn = InstrumentConnection::new(
            InstrumentMetadata::new("LS340", TransportKind::Bridge),
            Arc::new(MockOpener::new()),
        )
        .with_bridge(bridge.clone());

        conn.connect(&ResourceId::new("GPIB0::12")).unwrap();
        assert_eq!(handle.address(), Some(12));
        assert_eq!(conn.bus_address(), Some(12));
        assert_eq!(conn.ask("KRDG? A").as_f64(), 77.35);

        conn.close();
        assert!(bridge.is_open());
    }

    #[test]
    fn test_bridge_connection_rejects_bad_address() {
        let bridge = PrologixBridge::from_transport(Box::new(VirtualPrologix::new())).unwrap();
        let mut conn = InstrumentConnection::new(
            InstrumentMetadata::new("LS340", TransportKind::Bridge),
            Arc::new(MockOpener::new()),
        )
        .with_bridge(bridge);

        let result = conn.connect(&ResourceId::new("COM4"));
        assert!(matches!(result, Err(TransportError::MalformedResource(_))));
        assert_eq!(conn.state(), ConnectionState::Uninitialized);
    }
}
