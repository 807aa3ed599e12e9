//! Serial port enumeration
//!
//! Lists the operating system's serial ports, dropping the ones that can
//! never host an instrument. Ports behind an FTDI USB bridge, the chip
//! used by Prologix GPIB-USB adapters, are listed first so bridge probing
//! reaches the likely candidate early.

use serialport::SerialPortType;
use tracing::{debug, info};

use crate::error::DetectError;

/// FTDI USB vendor id
pub const FTDI_VID: u16 = 0x0403;

/// A serial port reported by the operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// OS device name (`/dev/ttyUSB0`, `COM3`)
    pub port: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    /// USB product string
    pub product: Option<String>,
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
            _ => (None, None, None),
        };
        Self {
            port: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

impl SerialPortInfo {
    /// Whether the port sits behind an FTDI USB-serial chip
    pub fn is_bridge_candidate(&self) -> bool {
        self.vid == Some(FTDI_VID)
    }

    /// Short description for listings
    pub fn description(&self) -> String {
        match (&self.product, self.vid, self.pid) {
            (Some(product), _, _) => product.clone(),
            (None, Some(vid), Some(pid)) => format!("USB {:04x}:{:04x}", vid, pid),
            _ => "serial port".to_string(),
        }
    }
}

/// Which ports the scanner ignores
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Substrings of port names to skip
    pub skip_patterns: Vec<String>,
}

/// Serial port scanner
#[derive(Debug, Clone)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Scanner skipping Bluetooth and debug console ports
    pub fn new() -> Self {
        Self::with_config(ScannerConfig {
            skip_patterns: vec!["Bluetooth".to_string(), "debug".to_string()],
        })
    }

    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Serial ports usable for instruments, bridge candidates first
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        let ports = serialport::available_ports()
            .map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
        Ok(self.select(ports.into_iter().map(SerialPortInfo::from)))
    }

    fn select(&self, ports: impl IntoIterator<Item = SerialPortInfo>) -> Vec<SerialPortInfo> {
        let mut selected: Vec<SerialPortInfo> = ports
            .into_iter()
            .filter(|p| {
                let skip = self.should_skip(&p.port);
                if skip {
                    debug!("ignoring serial port {}", p.port);
                }
                !skip
            })
            .collect();
        // stable: OS order is kept within each group
        selected.sort_by_key(|p| !p.is_bridge_candidate());

        for p in &selected {
            debug!("serial port {} ({})", p.port, p.description());
        }
        info!("{} serial port(s) available for instruments", selected.len());
        selected
    }

    fn should_skip(&self, port: &str) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}
