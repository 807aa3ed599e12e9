use std::collections::BTreeMap;

use lab_transport::TransportKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::InstrumentConnection;
use crate::driver::{Driver, InstrumentMetadata};
use crate::instrument::Instrument;

/// A channel read by sending one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericChannel {
    /// Channel name
    pub name: String,
    /// Unit string
    #[serde(default)]
    pub unit: String,
    /// Query whose reply is the channel value, e.g. `KRDG? A`
    pub query: String,
}

/// Configuration-defined instrument type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericDriverConfig {
    /// Instrument type name
    pub name: String,
    /// Transport the instrument talks over
    pub transport: TransportKind,
    /// Commands written once by `initialize`
    #[serde(default)]
    pub init_commands: Vec<String>,
    /// Measurable channels
    #[serde(default)]
    pub channels: Vec<GenericChannel>,
}

/// Driver for instruments that answer one query per channel
#[derive(Debug, Clone)]
pub struct GenericDriver {
    config: GenericDriverConfig,
}

impl GenericDriver {
    pub fn new(config: GenericDriverConfig) -> Self {
        Self { config }
    }
}

impl Driver for GenericDriver {
    fn metadata(&self) -> InstrumentMetadata {
        self.config
            .channels
            .iter()
            .fold(
                InstrumentMetadata::new(self.config.name.clone(), self.config.transport),
                |meta, c| meta.with_channel(&c.name, &c.unit),
            )
    }

    fn create(&self, connection: InstrumentConnection) -> Box<dyn Instrument> {
        Box::new(GenericInstrument {
            connection,
            init_commands: self.config.init_commands.clone(),
            queries: self
                .config
                .channels
                .iter()
                .map(|c| (c.name.clone(), c.query.clone()))
                .collect(),
        })
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }
}

/// Instance of a [`GenericDriver`]
///
/// Replies that don't parse as a number are reported as NaN.
#[derive(Debug)]
pub struct GenericInstrument {
    connection: InstrumentConnection,
    init_commands: Vec<String>,
    queries: BTreeMap<String, String>,
}

impl Instrument for GenericInstrument {
    fn connection(&self) -> &InstrumentConnection {
        &self.connection
    }

    fn connection_mut(&mut self) -> &mut InstrumentConnection {
        &mut self.connection
    }

    fn initialize(&mut self) {
        for command in &self.init_commands {
            if let Err(e) = self.connection.write(command) {
                debug!("{}: init command {:?} failed: {}", self.connection.id(), command, e);
            }
        }
    }

    fn measure(&mut self, channel: &str) -> Option<f64> {
        let query = self.queries.get(channel)?;
        let value = self.connection.ask(query).as_f64();
        self.connection.record_measurement(channel, value);
        Some(value)
    }
}
