//! Instrument Transport Simulation Library
//!
//! This crate provides a simulation layer for exercising connections, the
//! Prologix bridge and the hub without physical instruments. It includes:
//!
//! - **LoopbackTransport**: echoes every write back as the next reply
//! - **MockDevice / MockTransport / MockOpener**: scripted replies, fault
//!   injection and open/close accounting
//! - **VirtualPrologix**: a Prologix GPIB-USB adapter with devices at
//!   chosen bus addresses
//!
//! # Example
//!
//! ```rust
//! use lab_sim::VirtualPrologix;
//! use lab_transport::PrologixBridge;
//!
//! let adapter = VirtualPrologix::new().with_device(2, "LSCI,MODEL340,0,061407");
//! let probe = adapter.handle();
//! let bridge = PrologixBridge::from_transport(Box::new(adapter)).unwrap();
//!
//! let found = bridge.discover_addresses(3).unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(probe.idn_probes(), 4);
//! ```

pub mod loopback;
pub mod mock;
pub mod prologix;

pub use loopback::LoopbackTransport;
pub use mock::{MockDevice, MockOpener, MockTransport};
pub use prologix::{VirtualPrologix, VirtualPrologixHandle, VIRTUAL_PROLOGIX_VERSION};
