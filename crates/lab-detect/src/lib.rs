//! Instrument Port Discovery Library
//!
//! This crate enumerates the resource identifiers a hub can connect to:
//! live OS serial ports, bus addresses behind a Prologix bridge, and
//! resources known to the system VISA library.
//!
//! # Example
//!
//! ```rust,no_run
//! use lab_detect::PortDiscovery;
//!
//! let discovery = PortDiscovery::system(None);
//! for port in discovery.discover() {
//!     println!("Found port: {}", port);
//! }
//! ```

pub mod discovery;
pub mod error;
pub mod probe;
pub mod scanner;

pub use discovery::{
    debug_port_list, BridgeSource, PortDiscovery, PortSource, SerialSource, StaticSource,
    VisaSource, DEBUG_PORT_COUNT,
};
pub use error::DetectError;
pub use probe::{find_bridge_ports, probe_bridge, probe_serial_port, ProbeConfig};
pub use scanner::{PortScanner, ScannerConfig, SerialPortInfo, FTDI_VID};
