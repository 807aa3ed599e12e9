//! Liveness and bridge probing
//!
//! A serial port is considered live if it can be opened. A bridge port is
//! one where a Prologix adapter answers `++ver` with its product string.

use std::time::Duration;

use lab_transport::{
    PrologixBridge, ResourceId, TransportOpener, TransportOptions, DEFAULT_BAUD_RATE,
};
use tracing::{debug, info};

/// Configuration for probing
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Baud rate used to open candidates
    pub baud_rate: u32,
    /// Timeout for each probe attempt
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(100),
        }
    }
}

impl ProbeConfig {
    fn transport_options(&self) -> TransportOptions {
        TransportOptions::default()
            .with_baud_rate(self.baud_rate)
            .with_timeout(self.timeout)
    }
}

/// Check whether `port` can be opened; the port is closed again immediately
pub fn probe_serial_port(port: &str, baud_rate: u32, timeout: Duration) -> bool {
    match serialport::new(port, baud_rate).timeout(timeout).open() {
        Ok(_) => true,
        Err(e) => {
            debug!("{} is not available: {}", port, e);
            false
        }
    }
}

/// Try to bring up a Prologix bridge on `port`
///
/// Returns the adapter's identity string, or `None` if the port cannot be
/// opened or something other than a Prologix adapter is attached. The
/// probe bridge is closed before returning.
pub fn probe_bridge(
    port: &ResourceId,
    config: &ProbeConfig,
    opener: &dyn TransportOpener,
) -> Option<String> {
    match PrologixBridge::open(port, &config.transport_options(), opener) {
        Ok(bridge) => {
            let id = bridge.controller_id().unwrap_or_default();
            bridge.close();
            Some(id)
        }
        Err(e) => {
            debug!("No Prologix adapter on {}: {}", port, e);
            None
        }
    }
}

/// Candidates that have a Prologix adapter attached, in input order
pub fn find_bridge_ports(
    candidates: &[ResourceId],
    config: &ProbeConfig,
    opener: &dyn TransportOpener,
) -> Vec<ResourceId> {
    let found: Vec<ResourceId> = candidates
        .iter()
        .filter(|port| probe_bridge(port, config, opener).is_some())
        .cloned()
        .collect();

    info!("Found {} Prologix adapter(s)", found.len());
    found
}
