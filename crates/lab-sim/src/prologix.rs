//! Virtual Prologix GPIB-USB adapter
//!
//! Speaks the `++` command set on its serial side and routes everything
//! else to the simulated device at the selected bus address. With
//! `++auto 1` the device's reply is queued right after the write, the way
//! the real adapter reads back automatically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use lab_transport::{
    ResourceId, Transport, TransportError, TransportKind, DEFAULT_TIMEOUT, IDN_QUERY,
};
use parking_lot::Mutex;
use tracing::trace;

/// `++ver` reply of the virtual adapter
pub const VIRTUAL_PROLOGIX_VERSION: &str = "Prologix GPIB-USB Controller version 6.107";

#[derive(Debug, Default, Clone)]
struct BusDevice {
    idn: String,
    replies: HashMap<String, String>,
}

#[derive(Debug)]
struct AdapterState {
    version: String,
    devices: BTreeMap<u8, BusDevice>,
    address: Option<u8>,
    controller: bool,
    auto_read: bool,
    pending: VecDeque<String>,
    lines: Vec<String>,
    idn_probes: usize,
    timeout: Duration,
    fail_reads: bool,
    open: bool,
}

/// Inspection handle onto a [`VirtualPrologix`]
///
/// Stays valid after the adapter itself has been moved into a bridge.
#[derive(Debug, Clone)]
pub struct VirtualPrologixHandle {
    state: Arc<Mutex<AdapterState>>,
}

impl VirtualPrologixHandle {
    /// Every line received on the serial side, in order
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    /// Number of `*IDN?` queries forwarded to the bus
    pub fn idn_probes(&self) -> usize {
        self.state.lock().idn_probes
    }

    /// Last address selected with `++addr`
    pub fn address(&self) -> Option<u8> {
        self.state.lock().address
    }

    /// Whether `++mode 1` and `++auto 1` have been received
    pub fn configured(&self) -> bool {
        let state = self.state.lock();
        state.controller && state.auto_read
    }

    /// Current read timeout
    pub fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    /// Make every read fail with an I/O error
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Add or replace a reply for the device at `address`
    pub fn set_reply(&self, address: u8, command: &str, reply: &str) {
        self.state
            .lock()
            .devices
            .entry(address)
            .or_default()
            .replies
            .insert(command.to_string(), reply.to_string());
    }

    /// Whether the serial side has been closed
    pub fn is_closed(&self) -> bool {
        !self.state.lock().open
    }
}

/// A simulated Prologix adapter with devices on its bus
#[derive(Debug)]
pub struct VirtualPrologix {
    resource: ResourceId,
    state: Arc<Mutex<AdapterState>>,
}

impl VirtualPrologix {
    /// Create an adapter with an empty bus
    pub fn new() -> Self {
        Self {
            resource: ResourceId::new("/dev/ttyPROLOGIX"),
            state: Arc::new(Mutex::new(AdapterState {
                version: VIRTUAL_PROLOGIX_VERSION.to_string(),
                devices: BTreeMap::new(),
                address: None,
                controller: false,
                auto_read: false,
                pending: VecDeque::new(),
                lines: Vec::new(),
                idn_probes: 0,
                timeout: DEFAULT_TIMEOUT,
                fail_reads: false,
                open: true,
            })),
        }
    }

    /// Serial port name the adapter reports
    pub fn with_port(mut self, port: impl Into<ResourceId>) -> Self {
        self.resource = port.into();
        self
    }

    /// Override the `++ver` reply
    pub fn with_version(self, version: &str) -> Self {
        self.state.lock().version = version.to_string();
        self
    }

    /// Put a device answering `*IDN?` with `idn` at `address`
    pub fn with_device(self, address: u8, idn: &str) -> Self {
        self.state.lock().devices.entry(address).or_default().idn = idn.to_string();
        self
    }

    /// Add a canned reply for the device at `address`
    pub fn with_reply(self, address: u8, command: &str, reply: &str) -> Self {
        self.handle().set_reply(address, command, reply);
        self
    }

    /// Inspection handle sharing this adapter's state
    pub fn handle(&self) -> VirtualPrologixHandle {
        VirtualPrologixHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for VirtualPrologix {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterState {
    fn handle_control(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let arg = parts.next();
        match command {
            "++ver" => self.pending.push_back(self.version.clone()),
            "++mode" => self.controller = arg == Some("1"),
            "++auto" => self.auto_read = arg == Some("1"),
            "++addr" => match arg.and_then(|a| a.parse().ok()) {
                Some(addr) => self.address = Some(addr),
                None => self
                    .pending
                    .push_back(self.address.map(|a| a.to_string()).unwrap_or_default()),
            },
            _ => trace!("virtual prologix ignoring {:?}", line),
        }
    }

    fn forward(&mut self, line: &str) {
        if line == IDN_QUERY {
            self.idn_probes += 1;
        }
        let Some(device) = self.address.and_then(|a| self.devices.get(&a)) else {
            return;
        };
        let reply = if line == IDN_QUERY && !device.idn.is_empty() {
            Some(device.idn.clone())
        } else {
            device.replies.get(line).cloned()
        };
        if let (true, Some(reply)) = (self.auto_read, reply) {
            self.pending.push_back(reply);
        }
    }
}

impl Transport for VirtualPrologix {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        state.lines.push(payload.to_string());
        if payload.starts_with("++") {
            state.handle_control(payload);
        } else {
            state.forward(payload);
        }
        Ok(())
    }

    fn read(&mut self, _max_bytes: Option<usize>) -> Result<String, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        if state.fail_reads {
            return Err(TransportError::Io {
                resource: self.resource.to_string(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "simulated read fault"),
            });
        }
        Ok(state.pending.pop_front().unwrap_or_default())
    }

    fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        Ok(std::mem::replace(&mut self.state.lock().timeout, timeout))
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }
}
