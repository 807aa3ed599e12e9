//! Scripted devices for connection and hub tests
//!
//! A [`MockDevice`] is the far end of a link: it holds canned replies and
//! fault switches, and counts how often it was opened and closed. Every
//! [`MockTransport`] opened on it shares that state, so a test keeps a
//! clone of the device and inspects it after the code under test is done.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use lab_transport::{
    ResourceId, Transport, TransportError, TransportKind, TransportOpener, TransportOptions,
    IDN_QUERY,
};
use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug, Default)]
struct DeviceState {
    replies: HashMap<String, String>,
    pending: VecDeque<String>,
    written: Vec<String>,
    fail_writes: bool,
    fail_reads: bool,
    opened: usize,
    closed: usize,
}

/// Shared state of one simulated instrument
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Create a device with no canned replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device that answers `*IDN?` with `idn`
    pub fn with_idn(idn: &str) -> Self {
        Self::new().reply(IDN_QUERY, idn)
    }

    /// Answer `command` with `reply`
    pub fn reply(self, command: &str, reply: &str) -> Self {
        self.set_reply(command, reply);
        self
    }

    /// Answer `command` with `reply`, replacing any previous answer
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.state
            .lock()
            .replies
            .insert(command.to_string(), reply.to_string());
    }

    /// Make every write fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make every read fail with an I/O error
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Every payload written so far, without terminators
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Number of transports ever opened on this device
    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    /// Number of transports closed on this device
    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    /// Transports opened and not yet closed
    pub fn live_count(&self) -> usize {
        let state = self.state.lock();
        state.opened - state.closed
    }

    /// Open a new transport onto this device
    pub fn connect(
        &self,
        kind: TransportKind,
        resource: &ResourceId,
        options: &TransportOptions,
    ) -> MockTransport {
        self.state.lock().opened += 1;
        MockTransport {
            device: self.clone(),
            kind,
            resource: resource.clone(),
            timeout: options.timeout,
            open: true,
        }
    }
}

/// One open link onto a [`MockDevice`]
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    kind: TransportKind,
    resource: ResourceId,
    timeout: Duration,
    open: bool,
}

impl MockTransport {
    fn io_error(&self, what: &str) -> TransportError {
        TransportError::Io {
            resource: self.resource.to_string(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, format!("simulated {} fault", what)),
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        let mut state = self.device.state.lock();
        if state.fail_writes {
            drop(state);
            return Err(self.io_error("write"));
        }
        trace!("mock {} <- {:?}", self.resource, payload);
        state.written.push(payload.to_string());
        if let Some(reply) = state.replies.get(payload).cloned() {
            state.pending.push_back(reply);
        }
        Ok(())
    }

    fn read(&mut self, _max_bytes: Option<usize>) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        let mut state = self.device.state.lock();
        if state.fail_reads {
            drop(state);
            return Err(self.io_error("read"));
        }
        Ok(state.pending.pop_front().unwrap_or_default())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        Ok(std::mem::replace(&mut self.timeout, timeout))
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.device.state.lock().pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.device.state.lock().closed += 1;
        }
    }
}

/// [`TransportOpener`] that hands out [`MockTransport`]s
///
/// Resources must be registered with [`MockOpener::add_device`] first;
/// opening anything else fails like a missing port would.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    devices: Arc<Mutex<BTreeMap<ResourceId, MockDevice>>>,
    opened: Arc<Mutex<Vec<(TransportKind, ResourceId)>>>,
}

impl MockOpener {
    /// Create an opener with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `device` at `resource`
    pub fn add_device(&self, resource: impl Into<ResourceId>, device: MockDevice) -> MockDevice {
        self.devices.lock().insert(resource.into(), device.clone());
        device
    }

    /// Builder-style [`MockOpener::add_device`]
    pub fn with_device(self, resource: impl Into<ResourceId>, device: MockDevice) -> Self {
        self.add_device(resource, device);
        self
    }

    /// Device attached at `resource`
    pub fn device(&self, resource: &str) -> Option<MockDevice> {
        self.devices.lock().get(&ResourceId::new(resource)).cloned()
    }

    /// Every successful open, in order
    pub fn opened(&self) -> Vec<(TransportKind, ResourceId)> {
        self.opened.lock().clone()
    }

    /// Transports currently open across all devices
    pub fn live_count(&self) -> usize {
        self.devices.lock().values().map(MockDevice::live_count).sum()
    }
}

impl TransportOpener for MockOpener {
    fn open(
        &self,
        kind: TransportKind,
        resource: &ResourceId,
        options: &TransportOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let device = self.devices.lock().get(resource).cloned();
        let Some(device) = device else {
            return Err(TransportError::Connection {
                resource: resource.to_string(),
                reason: "no such device".to_string(),
            });
        };
        self.opened.lock().push((kind, resource.clone()));
        Ok(Box::new(device.connect(kind, resource, options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_reply() {
        let device = MockDevice::with_idn("ACME,DMM,1,0").reply("MEAS?", "1.5");
        let mut t = device.connect(
            TransportKind::Serial,
            &ResourceId::new("COM3"),
            &TransportOptions::default(),
        );

        t.write("*IDN?").unwrap();
        assert_eq!(t.read(None).unwrap(), "ACME,DMM,1,0");
        t.write("MEAS?").unwrap();
        assert_eq!(t.read(None).unwrap(), "1.5");
        t.write("UNKNOWN").unwrap();
        assert_eq!(t.read(None).unwrap(), "");
        assert_eq!(device.written(), vec!["*IDN?", "MEAS?", "UNKNOWN"]);
    }

    #[test]
    fn test_fault_injection() {
        let device = MockDevice::new();
        let mut t = device.connect(
            TransportKind::Serial,
            &ResourceId::new("COM3"),
            &TransportOptions::default(),
        );

        device.set_fail_writes(true);
        assert!(matches!(t.write("X"), Err(TransportError::Io { .. })));
        device.set_fail_writes(false);
        assert!(t.write("X").is_ok());

        device.set_fail_reads(true);
        assert!(matches!(t.read(None), Err(TransportError::Io { .. })));
    }

    #[test]
    fn test_close_is_counted_once() {
        let device = MockDevice::new();
        let mut t = device.connect(
            TransportKind::Serial,
            &ResourceId::new("COM3"),
            &TransportOptions::default(),
        );
        assert_eq!(device.live_count(), 1);

        t.close();
        t.close();
        assert_eq!(device.close_count(), 1);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn test_opener_rejects_unknown_resource() {
        let opener = MockOpener::new().with_device("COM3", MockDevice::new());

        let ok = opener.open(
            TransportKind::Serial,
            &ResourceId::new("COM3"),
            &TransportOptions::default(),
        );
        assert!(ok.is_ok());

        let missing = opener.open(
            TransportKind::Serial,
            &ResourceId::new("COM9"),
            &TransportOptions::default(),
        );
        assert!(matches!(missing, Err(TransportError::Connection { .. })));
        assert_eq!(opener.opened().len(), 1);
        assert_eq!(opener.live_count(), 1);
    }
}
