//! Prologix GPIB-USB bridge
//!
//! The adapter sits on one serial port and forwards traffic to whichever
//! GPIB address was selected last with `++addr`. Many instruments share the
//! one cable, so every exchange is an address switch followed by the
//! payload, and the two must never interleave with another channel's
//! exchange.
//!
//! # Wire protocol
//!
//! ASCII, newline-terminated:
//! - `++mode 1` - controller mode
//! - `++auto 1` - read back automatically after every write
//! - `++addr <n>` - select bus address `n`
//! - `++ver` - adapter firmware identity
//!
//! Anything else is passed through to the selected device.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::{
    ResourceId, Transport, TransportKind, TransportOpener, TransportOptions, IDN_QUERY,
    MAX_BUS_ADDRESS,
};

/// Product string the adapter must report in its `++ver` reply
pub const BRIDGE_PRODUCT_ID: &str = "Prologix GPIB-USB Controller";

/// Per-address timeout used while scanning the bus
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Mode flags set on the adapter at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMode {
    /// Adapter acts as bus controller (`++mode 1`)
    pub controller: bool,
    /// Adapter reads back after every write (`++auto 1`)
    pub auto_read: bool,
}

impl Default for BridgeMode {
    fn default() -> Self {
        Self {
            controller: true,
            auto_read: true,
        }
    }
}

/// The physical link, only ever touched with the lock held
struct BridgeLink {
    transport: Box<dyn Transport>,
    current_address: Option<u8>,
    mode: BridgeMode,
}

impl BridgeLink {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        trace!("bridge <- {:?}", line);
        self.transport.write(line)
    }

    fn read_line(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError> {
        let reply = self.transport.read(max_bytes)?;
        trace!("bridge -> {:?}", reply);
        Ok(reply)
    }

    fn configure(&mut self, mode: BridgeMode) -> Result<(), TransportError> {
        self.write_line(&format!("++mode {}", u8::from(mode.controller)))?;
        self.write_line(&format!("++auto {}", u8::from(mode.auto_read)))?;
        self.mode = mode;
        Ok(())
    }

    fn version(&mut self) -> Result<String, TransportError> {
        self.write_line("++ver")?;
        self.read_line(None)
    }

    /// Switch the bus context; `current_address` is only trusted once the switch was written
    fn select(&mut self, address: u8) -> Result<(), TransportError> {
        if address > MAX_BUS_ADDRESS {
            return Err(TransportError::MalformedResource(
                ResourceId::gpib(address).to_string(),
            ));
        }

        self.current_address = None;
        self.write_line(&format!("++addr {}", address))?;
        self.current_address = Some(address);
        Ok(())
    }

    fn scan(&mut self, max_address: u8) -> Result<Vec<ResourceId>, TransportError> {
        let mut found = Vec::new();

        for address in 0..=max_address {
            self.select(address)?;
            self.write_line(IDN_QUERY)?;
            let reply = self.read_line(None)?;

            if !reply.is_empty() {
                debug!("Found device at GPIB address {}: {}", address, reply);
                found.push(ResourceId::gpib(address));
            }
        }

        Ok(found)
    }
}

/// Shared handle to one Prologix adapter
///
/// Cloning the handle shares the same physical link. The bridge is the sole
/// owner of the serial transport; every bridge-kind connection holds a clone
/// of this handle and goes through [`PrologixBridge::transact`].
#[derive(Clone)]
pub struct PrologixBridge {
    port: ResourceId,
    link: Arc<Mutex<BridgeLink>>,
}

impl std::fmt::Debug for PrologixBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrologixBridge")
            .field("port", &self.port)
            .field("handles", &Arc::strong_count(&self.link))
            .finish()
    }
}

impl PrologixBridge {
    /// Open the adapter's serial port and initialize it
    ///
    /// The link always uses a newline terminator regardless of `options`.
    pub fn open(
        port: &ResourceId,
        options: &TransportOptions,
        opener: &dyn TransportOpener,
    ) -> Result<Self, TransportError> {
        let options = options.clone().with_terminator("\n");
        info!("Opening Prologix bridge on {}", port);
        let transport = opener.open(TransportKind::Serial, port, &options)?;
        Self::from_transport(transport)
    }

    /// Take ownership of an already-open link and initialize the adapter
    ///
    /// Sets controller and auto-read mode, then checks the `++ver` reply for
    /// [`BRIDGE_PRODUCT_ID`]. A device that fails the check is closed and
    /// reported as [`TransportError::BridgeIdentity`]; there is no partially
    /// usable bridge.
    pub fn from_transport(transport: Box<dyn Transport>) -> Result<Self, TransportError> {
        let port = transport.resource().clone();
        let mut link = BridgeLink {
            transport,
            current_address: None,
            mode: BridgeMode::default(),
        };

        let version = link
            .configure(BridgeMode::default())
            .and_then(|()| link.version());

        match version {
            Ok(version) if version.contains(BRIDGE_PRODUCT_ID) => {
                info!("Prologix bridge on {}: {}", port, version);
                Ok(Self {
                    port,
                    link: Arc::new(Mutex::new(link)),
                })
            }
            Ok(version) => {
                link.transport.close();
                Err(TransportError::BridgeIdentity {
                    port: port.to_string(),
                    reply: version,
                })
            }
            Err(e) => {
                link.transport.close();
                Err(e)
            }
        }
    }

    /// Serial port the adapter is attached to
    pub fn port(&self) -> &ResourceId {
        &self.port
    }

    /// Re-query the adapter firmware identity
    pub fn controller_id(&self) -> Result<String, TransportError> {
        self.link.lock().version()
    }

    /// Mode flags set on the adapter
    pub fn mode(&self) -> BridgeMode {
        self.link.lock().mode
    }

    /// Address the adapter was last switched to
    pub fn current_address(&self) -> Option<u8> {
        self.link.lock().current_address
    }

    /// Switch the bus context without sending a payload
    pub fn select(&self, address: u8) -> Result<(), TransportError> {
        self.link.lock().select(address)
    }

    /// Address `address` and write `command` without waiting for a reply
    pub fn write_to(&self, address: u8, command: &str) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        link.select(address)?;
        link.write_line(command)
    }

    /// Address `address` and read one reply
    pub fn read_from(&self, address: u8, max_bytes: Option<usize>) -> Result<String, TransportError> {
        let mut link = self.link.lock();
        if link.current_address != Some(address) {
            link.select(address)?;
        }
        link.read_line(max_bytes)
    }

    /// Address `address`, write `command` and read the reply as one atomic exchange
    pub fn transact(&self, address: u8, command: &str) -> Result<String, TransportError> {
        self.transact_limited(address, command, None)
    }

    /// [`transact`](Self::transact) reading at most `max_bytes` of the reply
    pub fn transact_limited(
        &self,
        address: u8,
        command: &str,
        max_bytes: Option<usize>,
    ) -> Result<String, TransportError> {
        let mut link = self.link.lock();
        Self::exchange(&mut link, address, command, max_bytes)
    }

    /// Like [`transact`](Self::transact) but gives up with
    /// [`TransportError::BusBusy`] if the link stays locked for `wait`
    pub fn try_transact(
        &self,
        address: u8,
        command: &str,
        wait: Duration,
    ) -> Result<String, TransportError> {
        let mut link = self
            .link
            .try_lock_for(wait)
            .ok_or_else(|| TransportError::BusBusy(self.port.to_string()))?;
        Self::exchange(&mut link, address, command, None)
    }

    fn exchange(
        link: &mut BridgeLink,
        address: u8,
        command: &str,
        max_bytes: Option<usize>,
    ) -> Result<String, TransportError> {
        link.select(address)?;
        link.write_line(command)?;
        link.read_line(max_bytes)
    }

    /// Scan addresses `0..=max_address` with the default probe timeout
    pub fn discover_addresses(&self, max_address: u8) -> Result<Vec<ResourceId>, TransportError> {
        self.discover_addresses_with_timeout(max_address, DISCOVERY_TIMEOUT)
    }

    /// Scan addresses `0..=max_address`, probing each with `*IDN?`
    ///
    /// An address is present iff it answers with a non-empty reply within
    /// `probe_timeout`. Results are in ascending address order. The link
    /// timeout is restored before returning, on success or failure. The
    /// whole scan holds the link lock, so it costs up to
    /// `(max_address + 1) * probe_timeout` of exclusive bus time.
    pub fn discover_addresses_with_timeout(
        &self,
        max_address: u8,
        probe_timeout: Duration,
    ) -> Result<Vec<ResourceId>, TransportError> {
        let max_address = if max_address > MAX_BUS_ADDRESS {
            warn!(
                "Clamping bus scan to address {} (requested {})",
                MAX_BUS_ADDRESS, max_address
            );
            MAX_BUS_ADDRESS
        } else {
            max_address
        };

        let mut link = self.link.lock();
        let previous = link.transport.set_timeout(probe_timeout)?;
        let scan = link.scan(max_address);
        let restored = link.transport.set_timeout(previous);

        let found = scan?;
        restored?;
        info!("Bus scan on {} found {} device(s)", self.port, found.len());
        Ok(found)
    }

    /// Current link timeout
    pub fn timeout(&self) -> Duration {
        self.link.lock().transport.timeout()
    }

    /// Change the link timeout, returning the previous value
    pub fn set_timeout(&self, timeout: Duration) -> Result<Duration, TransportError> {
        self.link.lock().transport.set_timeout(timeout)
    }

    /// Whether the physical link is still open
    pub fn is_open(&self) -> bool {
        self.link.lock().transport.is_open()
    }

    /// Close the physical link; idempotent
    pub fn close(&self) {
        let mut link = self.link.lock();
        if link.transport.is_open() {
            debug!("Closing Prologix bridge on {}", self.port);
        }
        link.transport.close();
        link.current_address = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Minimal adapter double: answers `++ver` and records every line
    struct FakeAdapter {
        resource: ResourceId,
        version: String,
        lines: Arc<Mutex<Vec<String>>>,
        replies: VecDeque<String>,
        timeout: Duration,
        open: bool,
    }

    impl FakeAdapter {
        fn new(version: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let adapter = Self {
                resource: ResourceId::new("/dev/ttyUSB9"),
                version: version.to_string(),
                lines: lines.clone(),
                replies: VecDeque::new(),
                timeout: Duration::from_secs(3),
                open: true,
            };
            (adapter, lines)
        }
    }

    impl Transport for FakeAdapter {
        fn kind(&self) -> TransportKind {
            TransportKind::Serial
        }

        fn resource(&self) -> &ResourceId {
            &self.resource
        }

        fn write(&mut self, payload: &str) -> Result<(), TransportError> {
            self.lines.lock().push(payload.to_string());
            match payload {
                "++ver" => self.replies.push_back(self.version.clone()),
                IDN_QUERY => self.replies.push_back(String::new()),
                _ => {}
            }
            Ok(())
        }

        fn read(&mut self, _max_bytes: Option<usize>) -> Result<String, TransportError> {
            Ok(self.replies.pop_front().unwrap_or_default())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
            Ok(std::mem::replace(&mut self.timeout, timeout))
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    #[test]
    fn test_construction_sets_modes_then_checks_version() {
        let (adapter, lines) = FakeAdapter::new("Prologix GPIB-USB Controller version 6.101");
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        assert_eq!(*lines.lock(), vec!["++mode 1", "++auto 1", "++ver"]);
        assert_eq!(bridge.mode(), BridgeMode::default());
        assert_eq!(bridge.current_address(), None);
    }

    #[test]
    fn test_wrong_identity_is_fatal() {
        let (adapter, _lines) = FakeAdapter::new("Arduino Uno");
        let err = PrologixBridge::from_transport(Box::new(adapter)).unwrap_err();

        assert!(matches!(err, TransportError::BridgeIdentity { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transact_switches_address_first() {
        let (adapter, lines) = FakeAdapter::new(BRIDGE_PRODUCT_ID);
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();
        lines.lock().clear();

        bridge.transact(12, "KRDG? A").unwrap();

        assert_eq!(*lines.lock(), vec!["++addr 12", "KRDG? A"]);
        assert_eq!(bridge.current_address(), Some(12));
    }

    #[test]
    fn test_select_rejects_out_of_range_address() {
        let (adapter, _lines) = FakeAdapter::new(BRIDGE_PRODUCT_ID);
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        assert!(matches!(
            bridge.select(31),
            Err(TransportError::MalformedResource(_))
        ));
    }

    #[test]
    fn test_set_timeout_returns_previous() {
        let (adapter, _lines) = FakeAdapter::new(BRIDGE_PRODUCT_ID);
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        let previous = bridge.set_timeout(Duration::from_millis(50)).unwrap();
        assert_eq!(previous, Duration::from_secs(3));
        assert_eq!(bridge.timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_try_transact_reports_busy_link() {
        let (adapter, _lines) = FakeAdapter::new(BRIDGE_PRODUCT_ID);
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        let _held = bridge.link.lock();
        let other = bridge.clone();
        let result = other.try_transact(3, IDN_QUERY, Duration::from_millis(10));
        assert!(matches!(result, Err(TransportError::BusBusy(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (adapter, _lines) = FakeAdapter::new(BRIDGE_PRODUCT_ID);
        let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();

        bridge.close();
        bridge.close();
        assert!(!bridge.is_open());
    }
}
