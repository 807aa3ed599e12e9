//! Instrument hub
//!
//! The hub owns every connection of an experiment, keyed by resolved port,
//! plus the ordered list of (port, parameter) pairs that defines polling
//! order. Several pairs may share one connection (one instrument, several
//! measured parameters); a port can never be bound to two instrument types.
//!
//! Bridge-routed instruments share one [`PrologixBridge`], either supplied
//! with [`InstrumentHub::with_bridge`] or opened on first use.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use lab_detect::{
    debug_port_list, find_bridge_ports, BridgeSource, PortDiscovery, ProbeConfig, SerialSource,
    VisaSource,
};
use lab_transport::{PrologixBridge, ResourceId, SystemOpener, TransportKind, TransportOpener};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::connection::InstrumentConnection;
use crate::driver::DriverRegistry;
use crate::error::HubError;
use crate::events::HubEvent;
use crate::instrument::Instrument;

/// Instrument type name that reserves a slot without connecting anything
pub const NO_INSTRUMENT: &str = "NONE";

const EVENT_CAPACITY: usize = 256;

/// One entry of the polling order
///
/// Both fields are `None` for a placeholder, which keeps positions aligned
/// with the caller's parallel lists of names, ports and parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortParam {
    /// Resolved port of the instrument
    pub port: Option<ResourceId>,
    /// Parameter (channel) measured
    pub parameter: Option<String>,
}

impl PortParam {
    pub fn new(port: ResourceId, parameter: impl Into<String>) -> Self {
        Self {
            port: Some(port),
            parameter: Some(parameter.into()),
        }
    }

    /// The `(None, None)` placeholder
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.port.is_none()
    }
}

/// Outcome of a registration that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new connection was opened and registered under this port
    Connected(ResourceId),
    /// The port already held an instrument of the same type
    Shared(ResourceId),
    /// The port is bound to another type; a placeholder was appended
    Conflict {
        port: ResourceId,
        /// Type already registered at `port`
        existing: String,
    },
    /// Empty or `NONE` instrument name; a placeholder was appended
    Placeholder,
}

impl Registration {
    /// Resolved port, if the registration produced a real pair
    pub fn port(&self) -> Option<&ResourceId> {
        match self {
            Registration::Connected(port) | Registration::Shared(port) => Some(port),
            _ => None,
        }
    }
}

/// Registry of instrument connections keyed by port
pub struct InstrumentHub {
    config: HubConfig,
    registry: DriverRegistry,
    opener: Arc<dyn TransportOpener>,
    bridge: Option<PrologixBridge>,
    owns_bridge: bool,
    instruments: IndexMap<ResourceId, Box<dyn Instrument>>,
    pairs: Vec<PortParam>,
    events: broadcast::Sender<HubEvent>,
}

impl std::fmt::Debug for InstrumentHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentHub")
            .field("debug", &self.config.debug)
            .field("bridge", &self.bridge)
            .field("instruments", &self.instruments.keys().collect::<Vec<_>>())
            .field("pairs", &self.pairs)
            .finish()
    }
}

impl InstrumentHub {
    /// Create a hub using the operating system transports
    pub fn new(config: HubConfig, registry: DriverRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!("InstrumentHub created (debug: {})", config.debug);
        Self {
            config,
            registry,
            opener: Arc::new(SystemOpener),
            bridge: None,
            owns_bridge: false,
            instruments: IndexMap::new(),
            pairs: Vec::new(),
            events,
        }
    }

    /// Open transports through `opener` instead
    pub fn with_opener(mut self, opener: Arc<dyn TransportOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Route bridge instruments through an existing bridge
    ///
    /// The hub will not close a bridge it was given.
    pub fn with_bridge(mut self, bridge: PrologixBridge) -> Self {
        self.bridge = Some(bridge);
        self.owns_bridge = false;
        self
    }

    /// Subscribe to registry changes
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: HubEvent) {
        debug!("hub event: {:?}", event);
        let _ = self.events.send(event);
    }

    fn emit_list_changed(&self) {
        self.emit(HubEvent::ListChanged {
            pairs: self.pairs.len(),
        });
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Whether new connections are created in simulation mode
    pub fn is_debug(&self) -> bool {
        self.config.debug
    }

    /// Change the simulation flag for connections created from now on
    pub fn set_debug(&mut self, state: bool) {
        self.config.debug = state;
        debug!("debug mode of InstrumentHub: {}", state);
    }

    /// Registered connections in registration order
    pub fn instruments(&self) -> impl Iterator<Item = (&ResourceId, &dyn Instrument)> {
        self.instruments.iter().map(|(port, inst)| (port, inst.as_ref()))
    }

    /// Instrument registered at `port`
    pub fn instrument(&self, port: &ResourceId) -> Option<&dyn Instrument> {
        self.instruments.get(port).map(|inst| inst.as_ref())
    }

    /// Instrument registered at `port`, mutably
    pub fn instrument_mut(&mut self, port: &ResourceId) -> Option<&mut (dyn Instrument + 'static)> {
        self.instruments.get_mut(port).map(|inst| inst.as_mut())
    }

    /// The ordered (port, parameter) pairs
    pub fn pairs(&self) -> &[PortParam] {
        &self.pairs
    }

    /// Number of pairs, placeholders included
    pub fn instrument_count(&self) -> usize {
        self.pairs.len()
    }

    /// Number of distinct open connections
    pub fn connection_count(&self) -> usize {
        self.instruments.len()
    }

    /// The shared bridge, opening it on first use
    pub fn bridge(&mut self) -> Result<PrologixBridge, HubError> {
        if let Some(bridge) = &self.bridge {
            return Ok(bridge.clone());
        }

        let bridge_config = &self.config.bridge;
        let port = match bridge_config.port() {
            Some(port) => port,
            None => {
                let candidates = SerialSource::new().candidates()?;
                let probe = ProbeConfig {
                    baud_rate: bridge_config.baud_rate,
                    ..ProbeConfig::default()
                };
                find_bridge_ports(&candidates, &probe, self.opener.as_ref())
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        HubError::BridgeUnavailable("no Prologix adapter found".to_string())
                    })?
            }
        };

        let bridge = PrologixBridge::open(
            &port,
            &bridge_config.transport_options(),
            self.opener.as_ref(),
        )
        .map_err(|e| HubError::BridgeUnavailable(format!("{}: {}", port, e)))?;

        self.bridge = Some(bridge.clone());
        self.owns_bridge = true;
        Ok(bridge)
    }

    /// Register `instrument` at `port` to measure `parameter`
    ///
    /// Always appends exactly one pair: the resolved port and parameter on
    /// success, a placeholder otherwise. Conflicts are reported as
    /// [`Registration::Conflict`], not as errors, and leave the existing
    /// connection untouched.
    pub fn connect_instrument(
        &mut self,
        instrument: &str,
        port: impl Into<ResourceId>,
        parameter: &str,
    ) -> Result<Registration, HubError> {
        self.register(instrument, port.into(), parameter, true)
    }

    fn register(
        &mut self,
        name: &str,
        port: ResourceId,
        parameter: &str,
        notify: bool,
    ) -> Result<Registration, HubError> {
        let name = name.trim();
        if name.is_empty() || name == NO_INSTRUMENT {
            self.pairs.push(PortParam::placeholder());
            if notify {
                self.emit_list_changed();
            }
            return Ok(Registration::Placeholder);
        }

        if self.instruments.contains_key(&port) {
            return Ok(self.register_existing(port, name, parameter, notify));
        }

        match self.open_instrument(name, &port) {
            Ok((resolved, mut instrument)) => {
                if resolved != port && self.instruments.contains_key(&resolved) {
                    debug!("{} resolved to already registered {}", port, resolved);
                    instrument.close();
                    return Ok(self.register_existing(resolved, name, parameter, notify));
                }

                info!("Connected {} to {} to measure {}", name, resolved, parameter);
                self.instruments.insert(resolved.clone(), instrument);
                self.pairs.push(PortParam::new(resolved.clone(), parameter));
                self.emit(HubEvent::InstrumentConnected {
                    port: resolved.clone(),
                    instrument: name.to_string(),
                    parameter: parameter.to_string(),
                });
                if notify {
                    self.emit_list_changed();
                }
                Ok(Registration::Connected(resolved))
            }
            Err(e) => {
                warn!("Could not connect {} to {}: {}", name, port, e);
                self.pairs.push(PortParam::placeholder());
                if notify {
                    self.emit_list_changed();
                }
                Err(e)
            }
        }
    }

    fn register_existing(
        &mut self,
        port: ResourceId,
        name: &str,
        parameter: &str,
        notify: bool,
    ) -> Registration {
        let existing = self
            .instruments
            .get(&port)
            .map(|inst| inst.id().to_string())
            .unwrap_or_default();

        if existing == name {
            debug!("Added measurement of {} to {} at {}", parameter, name, port);
            self.pairs.push(PortParam::new(port.clone(), parameter));
            self.emit(HubEvent::InstrumentShared {
                port: port.clone(),
                instrument: name.to_string(),
                parameter: parameter.to_string(),
            });
            if notify {
                self.emit_list_changed();
            }
            Registration::Shared(port)
        } else {
            warn!(
                "Cannot connect {} to {}: {} is already connected there",
                name, port, existing
            );
            self.pairs.push(PortParam::placeholder());
            self.emit(HubEvent::RegistrationConflict {
                port: port.clone(),
                requested: name.to_string(),
                existing: existing.clone(),
            });
            Registration::Conflict { port, existing }
        }
    }

    fn open_instrument(
        &mut self,
        name: &str,
        port: &ResourceId,
    ) -> Result<(ResourceId, Box<dyn Instrument>), HubError> {
        let driver = self
            .registry
            .get(name)
            .ok_or_else(|| HubError::UnknownInstrument(name.to_string()))?;
        let metadata = driver.metadata();

        let mut connection = InstrumentConnection::new(metadata.clone(), Arc::clone(&self.opener))
            .with_debug(self.config.debug)
            .with_options(self.config.options.clone());
        if metadata.transport == TransportKind::Bridge && !self.config.debug {
            connection = connection.with_bridge(self.bridge()?);
        }

        let mut instrument = driver.create(connection);
        instrument.connect(port)?;
        let resolved = instrument
            .connection()
            .resource()
            .cloned()
            .unwrap_or_else(|| port.clone());
        Ok((resolved, instrument))
    }

    /// Replace every registration with the given triples
    ///
    /// Clears the hub first, then registers each `(name, port, parameter)`
    /// in order. A failure or conflict on one triple does not stop the
    /// rest; the per-triple outcomes are returned in order. Slices of
    /// unequal length are truncated to the shortest.
    pub fn connect_hub<N, P, Q>(
        &mut self,
        names: &[N],
        ports: &[P],
        parameters: &[Q],
    ) -> Vec<Result<Registration, HubError>>
    where
        N: AsRef<str>,
        P: AsRef<str>,
        Q: AsRef<str>,
    {
        self.clean_up();

        let results = names
            .iter()
            .zip(ports)
            .zip(parameters)
            .map(|((name, port), parameter)| {
                debug!(
                    "connect_hub: connecting {} to {} to measure {}",
                    name.as_ref(),
                    port.as_ref(),
                    parameter.as_ref()
                );
                self.register(
                    name.as_ref(),
                    ResourceId::new(port),
                    parameter.as_ref(),
                    false,
                )
            })
            .collect();

        self.emit_list_changed();
        results
    }

    /// Drop the last pair, closing its connection if no other pair uses it
    pub fn remove_last(&mut self) -> Option<PortParam> {
        let removed = self.pairs.pop()?;

        if let Some(port) = &removed.port {
            let still_used = self.pairs.iter().any(|p| p.port.as_ref() == Some(port));
            if !still_used {
                self.unregister(port);
            }
        }

        self.emit_list_changed();
        Some(removed)
    }

    /// Close and unregister the connection at `port`
    ///
    /// Its pairs become placeholders so the positions of the others are
    /// unchanged.
    pub fn disconnect(&mut self, port: &ResourceId) -> Result<(), HubError> {
        if !self.unregister(port) {
            return Err(HubError::NotConnected(port.clone()));
        }
        for pair in self.pairs.iter_mut().filter(|p| p.port.as_ref() == Some(port)) {
            *pair = PortParam::placeholder();
        }
        self.emit_list_changed();
        Ok(())
    }

    fn unregister(&mut self, port: &ResourceId) -> bool {
        let Some(mut instrument) = self.instruments.shift_remove(port) else {
            return false;
        };
        instrument.close();
        info!("Disconnected {} from {}", instrument.id(), port);
        self.emit(HubEvent::InstrumentDisconnected {
            port: port.clone(),
            instrument: instrument.id().to_string(),
        });
        true
    }

    /// Close every connection and empty the registry and the pairs list
    ///
    /// Safe on an empty hub and safe to repeat. The bridge stays open.
    pub fn clean_up(&mut self) {
        for (port, mut instrument) in self.instruments.drain(..) {
            debug!("closing {} at {}", instrument.id(), port);
            instrument.close();
        }
        self.pairs.clear();
        self.emit(HubEvent::Cleared);
    }

    /// Run every instrument's start-of-run hook
    pub fn initialize_all(&mut self) {
        for instrument in self.instruments.values_mut() {
            instrument.initialize();
        }
    }

    /// Measure every pair in order; placeholders yield `None`
    pub fn poll(&mut self) -> Vec<Option<f64>> {
        let mut values = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            let value = match (&pair.port, &pair.parameter) {
                (Some(port), Some(parameter)) => self
                    .instruments
                    .get_mut(port)
                    .and_then(|inst| inst.measure(parameter)),
                _ => None,
            };
            values.push(value);
        }
        values
    }

    /// Identification string of every registered instrument
    pub fn identify_all(&mut self) -> Vec<(ResourceId, String)> {
        self.instruments
            .iter_mut()
            .map(|(port, inst)| (port.clone(), inst.identify()))
            .collect()
    }

    /// Discovery over serial ports, VISA and the bridge (if one is open)
    pub fn port_discovery(&self) -> PortDiscovery {
        let mut discovery = PortDiscovery::new()
            .with_source(SerialSource::new())
            .with_source(VisaSource::new());
        if let Some(bridge) = &self.bridge {
            discovery = discovery.with_source(
                BridgeSource::new(bridge.clone())
                    .with_max_address(self.config.bridge.max_address)
                    .with_probe_timeout(self.config.bridge.discovery_timeout()),
            );
        }
        discovery
    }

    /// Every port an instrument could be connected to
    ///
    /// In debug mode this is the fixed list `GPIB0::0..=29`.
    pub fn get_connectable_ports(&mut self) -> BTreeSet<ResourceId> {
        if self.config.debug {
            return debug_port_list().into_iter().collect();
        }
        if let Err(e) = self.bridge() {
            debug!("bus scan skipped: {}", e);
        }
        self.port_discovery().discover()
    }
}

impl Drop for InstrumentHub {
    fn drop(&mut self) {
        self.clean_up();
        if self.owns_bridge {
            if let Some(bridge) = self.bridge.take() {
                bridge.close();
            }
        }
        info!("InstrumentHub deleted");
    }
}
