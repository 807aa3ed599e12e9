//! Driver registry
//!
//! Every instrument type is a [`Driver`]: it describes the instrument
//! ([`InstrumentMetadata`]) and builds instances around a prepared
//! [`InstrumentConnection`]. The hub resolves type names through a
//! [`DriverRegistry`] populated at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use lab_transport::TransportKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::InstrumentConnection;
use crate::drivers::{DiceDriver, TimeDriver};
use crate::instrument::Instrument;

/// One measurable quantity of an instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name used in pairs and `measure` calls
    pub name: String,
    /// Unit string, e.g. `K` or `mbar`
    pub unit: String,
    /// Label shown to users
    pub display_name: String,
}

/// Static description of an instrument type
///
/// Every connection carries its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    /// Instrument type name, e.g. `LS340`
    pub name: String,
    /// Transport the instrument talks over
    pub transport: TransportKind,
    /// Channels in declaration order
    pub channels: Vec<ChannelInfo>,
}

impl InstrumentMetadata {
    /// Metadata with no channels
    pub fn new(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            channels: Vec::new(),
        }
    }

    /// Add a channel displayed under its own name
    pub fn with_channel(self, name: &str, unit: &str) -> Self {
        self.with_named_channel(name, unit, name)
    }

    /// Add a channel with a separate display name
    pub fn with_named_channel(mut self, name: &str, unit: &str, display_name: &str) -> Self {
        self.channels.push(ChannelInfo {
            name: name.to_string(),
            unit: unit.to_string(),
            display_name: display_name.to_string(),
        });
        self
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Channel names in declaration order
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Channel name to unit mapping
    pub fn units(&self) -> BTreeMap<String, String> {
        self.channels
            .iter()
            .map(|c| (c.name.clone(), c.unit.clone()))
            .collect()
    }
}

/// Factory for one instrument type
pub trait Driver: Send + Sync {
    /// Description of the instrument type
    fn metadata(&self) -> InstrumentMetadata;

    /// Wrap a prepared (not yet connected) connection
    fn create(&self, connection: InstrumentConnection) -> Box<dyn Instrument>;

    /// Type name, taken from the metadata
    fn name(&self) -> String {
        self.metadata().name
    }
}

/// Instrument type name to driver
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `TIME` and `DICE` drivers
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(TimeDriver);
        registry.register(DiceDriver);
        registry
    }

    /// Add a driver, replacing any previous driver of the same name
    pub fn register(&mut self, driver: impl Driver + 'static) {
        let name = driver.name();
        debug!("Registering driver {}", name);
        self.drivers.insert(name, Arc::new(driver));
    }

    /// Look up a driver by type name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    /// Whether a driver of this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// All type names, sorted
    pub fn names(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }

    /// Type names of drivers using `kind`
    pub fn by_transport(&self, kind: TransportKind) -> Vec<String> {
        self.drivers
            .iter()
            .filter(|(_, d)| d.metadata().transport == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Type names of drivers that talk to real hardware
    pub fn hardware(&self) -> Vec<String> {
        self.drivers
            .iter()
            .filter(|(_, d)| d.metadata().transport != TransportKind::None)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Channel to unit mapping of one type
    pub fn units(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.drivers.get(name).map(|d| d.metadata().units())
    }

    /// Number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no drivers are registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
