//! Merged port discovery
//!
//! Each transport kind contributes candidates through a [`PortSource`];
//! [`PortDiscovery`] asks every source in turn and merges the answers
//! into one de-duplicated set. A failing source is logged and skipped.
//! Discovery never touches hub state.

use std::collections::BTreeSet;
use std::time::Duration;

use lab_transport::{PrologixBridge, ResourceId, DISCOVERY_TIMEOUT, MAX_BUS_ADDRESS};
use tracing::{debug, info, warn};

use crate::error::DetectError;
use crate::probe::{probe_serial_port, ProbeConfig};
use crate::scanner::PortScanner;

/// Number of placeholder bus addresses offered in simulation mode
pub const DEBUG_PORT_COUNT: u8 = 30;

/// A provider of candidate resource identifiers
pub trait PortSource: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// List the identifiers this source can currently reach
    fn list(&self) -> Result<Vec<ResourceId>, DetectError>;
}

/// OS serial ports that can actually be opened
#[derive(Debug, Clone, Default)]
pub struct SerialSource {
    scanner: PortScanner,
    probe: ProbeConfig,
}

impl SerialSource {
    /// Create a source with the default scanner and probe settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom scanner and probe configuration
    pub fn with_config(scanner: PortScanner, probe: ProbeConfig) -> Self {
        Self { scanner, probe }
    }

    /// Enumerated ports, without the liveness check
    pub fn candidates(&self) -> Result<Vec<ResourceId>, DetectError> {
        Ok(self
            .scanner
            .enumerate_ports()?
            .into_iter()
            .map(|p| ResourceId::new(p.port))
            .collect())
    }
}

impl PortSource for SerialSource {
    fn name(&self) -> &str {
        "serial"
    }

    fn list(&self) -> Result<Vec<ResourceId>, DetectError> {
        Ok(self
            .candidates()?
            .into_iter()
            .filter(|p| probe_serial_port(p.as_str(), self.probe.baud_rate, self.probe.timeout))
            .collect())
    }
}

/// Bus addresses answering behind a Prologix bridge
#[derive(Debug, Clone)]
pub struct BridgeSource {
    bridge: PrologixBridge,
    max_address: u8,
    probe_timeout: Duration,
}

impl BridgeSource {
    /// Scan `bridge` over the full address range
    pub fn new(bridge: PrologixBridge) -> Self {
        Self {
            bridge,
            max_address: MAX_BUS_ADDRESS,
            probe_timeout: DISCOVERY_TIMEOUT,
        }
    }

    /// Limit the scan to `0..=max_address`
    pub fn with_max_address(mut self, max_address: u8) -> Self {
        self.max_address = max_address;
        self
    }

    /// Per-address probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

impl PortSource for BridgeSource {
    fn name(&self) -> &str {
        "prologix"
    }

    fn list(&self) -> Result<Vec<ResourceId>, DetectError> {
        Ok(self
            .bridge
            .discover_addresses_with_timeout(self.max_address, self.probe_timeout)?)
    }
}

/// Resources reported by the system VISA library
///
/// Only resources whose name contains `filter` are kept; by default that
/// is `GPIB`, since serial devices are already covered by [`SerialSource`].
#[derive(Debug, Clone)]
pub struct VisaSource {
    filter: String,
}

impl VisaSource {
    /// Keep GPIB resources only
    pub fn new() -> Self {
        Self {
            filter: "GPIB".to_string(),
        }
    }

    /// Keep resources containing `filter`
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }

    /// Apply the name filter to raw resource names
    pub fn filter_names<I, S>(&self, names: I) -> Vec<ResourceId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter(|n| n.as_ref().contains(self.filter.as_str()))
            .map(|n| ResourceId::new(n.as_ref()))
            .collect()
    }

    #[cfg(feature = "visa")]
    fn raw_names(&self) -> Result<Vec<String>, DetectError> {
        use std::ffi::CString;
        use visa_rs::prelude::*;

        let rm = DefaultRM::new().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
        let expr = CString::new("?*INSTR").map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
        let expr = visa_rs::VisaString::from(expr);
        let mut list = match rm.find_res_list(&expr) {
            Ok(list) => list,
            Err(e) => {
                debug!("VISA found no resources: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut names = Vec::new();
        while let Some(name) = list
            .find_next()
            .map_err(|e| DetectError::EnumerationFailed(e.to_string()))?
        {
            names.push(name.to_string());
        }
        Ok(names)
    }

    #[cfg(not(feature = "visa"))]
    fn raw_names(&self) -> Result<Vec<String>, DetectError> {
        debug!("VISA support not enabled, skipping VISA enumeration");
        Ok(Vec::new())
    }
}

impl Default for VisaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PortSource for VisaSource {
    fn name(&self) -> &str {
        "visa"
    }

    fn list(&self) -> Result<Vec<ResourceId>, DetectError> {
        Ok(self.filter_names(self.raw_names()?))
    }
}

/// A fixed list of identifiers
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    ports: Vec<ResourceId>,
}

impl StaticSource {
    /// Source that always reports `ports`
    pub fn new<I, R>(ports: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceId>,
    {
        Self {
            ports: ports.into_iter().map(Into::into).collect(),
        }
    }
}

impl PortSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn list(&self) -> Result<Vec<ResourceId>, DetectError> {
        Ok(self.ports.clone())
    }
}

/// Merges candidates from every configured source
#[derive(Default)]
pub struct PortDiscovery {
    sources: Vec<Box<dyn PortSource>>,
}

impl std::fmt::Debug for PortDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("PortDiscovery").field("sources", &names).finish()
    }
}

impl PortDiscovery {
    /// Discovery with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial and VISA sources, plus a bridge scan when a bridge is given
    pub fn system(bridge: Option<PrologixBridge>) -> Self {
        let mut discovery = Self::new()
            .with_source(SerialSource::new())
            .with_source(VisaSource::new());
        if let Some(bridge) = bridge {
            discovery = discovery.with_source(BridgeSource::new(bridge));
        }
        discovery
    }

    /// Add a source
    pub fn with_source(mut self, source: impl PortSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Number of configured sources
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Union of every source's identifiers
    pub fn discover(&self) -> BTreeSet<ResourceId> {
        let mut found = BTreeSet::new();
        for source in &self.sources {
            match source.list() {
                Ok(ports) => {
                    debug!("{} source reported {} port(s)", source.name(), ports.len());
                    found.extend(ports);
                }
                Err(e) => warn!("{} source failed: {}", source.name(), e),
            }
        }
        info!("Discovered {} connectable port(s)", found.len());
        found
    }
}

/// Placeholder bus addresses `GPIB0::0` through `GPIB0::29`
pub fn debug_port_list() -> Vec<ResourceId> {
    (0..DEBUG_PORT_COUNT).map(ResourceId::gpib).collect()
}
