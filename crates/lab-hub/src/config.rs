//! Hub configuration

use std::time::Duration;

use lab_transport::{
    ResourceId, TransportOptions, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT, DISCOVERY_TIMEOUT,
    MAX_BUS_ADDRESS,
};
use serde::{Deserialize, Serialize};

/// Prologix bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial port of the adapter; probed for when unset
    pub port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Link timeout (ms)
    pub timeout_ms: u64,
    /// Per-address timeout during bus scans (ms)
    pub discovery_timeout_ms: u64,
    /// Highest bus address scanned
    pub max_address: u8,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            max_address: MAX_BUS_ADDRESS,
        }
    }
}

impl BridgeConfig {
    /// Configured port, if any
    pub fn port(&self) -> Option<ResourceId> {
        self.port
            .as_deref()
            .map(ResourceId::new)
            .filter(|p| !p.is_empty())
    }

    /// Options for opening the adapter's serial link
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions::default()
            .with_baud_rate(self.baud_rate)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }

    /// Per-address scan timeout
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

/// Hub configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Simulation flag copied into every new connection
    pub debug: bool,
    /// Prologix bridge settings
    pub bridge: BridgeConfig,
    /// Transport options for directly connected instruments
    pub options: TransportOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout_ms, 3000);
        assert_eq!(config.discovery_timeout(), Duration::from_millis(100));
        assert_eq!(config.max_address, 30);
        assert!(config.port().is_none());
    }

    #[test]
    fn test_partial_json() {
        let config: HubConfig =
            serde_json::from_str(r#"{"debug":true,"bridge":{"port":"COM7"}}"#).unwrap();

        assert!(config.debug);
        assert_eq!(config.bridge.port(), Some(ResourceId::new("COM7")));
        assert_eq!(config.bridge.baud_rate, 9600);
        assert_eq!(config.options, TransportOptions::default());
    }
}
