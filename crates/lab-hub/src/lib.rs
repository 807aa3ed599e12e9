//! Laboratory Instrument Hub
//!
//! This crate provides the per-instrument connection and the hub that
//! registers, polls and tears down many of them.
//!
//! # Architecture
//!
//! - [`InstrumentConnection`] wraps one transport (or one bus address
//!   behind the shared Prologix bridge) and never lets a single failed
//!   command escape: `ask` returns a [`Reply`] instead of an error.
//! - Instrument types are [`Driver`]s looked up by name in a
//!   [`DriverRegistry`]; each builds an [`Instrument`] around a prepared
//!   connection.
//! - [`InstrumentHub`] keys connections by resolved port, keeps the
//!   ordered (port, parameter) pairs that define polling order, rejects
//!   type conflicts and publishes [`HubEvent`]s.
//!
//! # Example
//!
//! ```rust
//! use lab_hub::{DriverRegistry, HubConfig, InstrumentHub};
//!
//! let config = HubConfig {
//!     debug: true,
//!     ..HubConfig::default()
//! };
//! let mut hub = InstrumentHub::new(config, DriverRegistry::with_builtin());
//!
//! hub.connect_hub(&["TIME", "DICE", "TIME"], &["", "COM14", ""], &["Time", "Roll", "dt"]);
//! assert_eq!(hub.connection_count(), 2);
//!
//! let values = hub.poll();
//! assert_eq!(values.len(), 3);
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod events;
pub mod hub;
pub mod instrument;
pub mod reply;

pub use config::{BridgeConfig, HubConfig};
pub use connection::{ConnectionState, InstrumentConnection, UNKNOWN_INSTRUMENT};
pub use driver::{ChannelInfo, Driver, DriverRegistry, InstrumentMetadata};
pub use drivers::{DiceDriver, GenericChannel, GenericDriver, GenericDriverConfig, TimeDriver};
pub use error::{CommandFault, HubError};
pub use events::HubEvent;
pub use hub::{InstrumentHub, PortParam, Registration, NO_INSTRUMENT};
pub use instrument::Instrument;
pub use reply::Reply;
