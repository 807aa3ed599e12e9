//! Resource identifiers
//!
//! A resource identifier names one physical or logical endpoint: a VISA
//! resource string, an OS serial device path, or a bridge bus address in
//! the `GPIB0::<n>` form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Prefix of bus addresses served through the bridge
pub const GPIB_PREFIX: &str = "GPIB0::";

/// Highest primary address on a GPIB bus
pub const MAX_BUS_ADDRESS: u8 = 30;

/// Canonical name of a transport endpoint
///
/// Two identifiers are equal iff their canonical (trimmed) forms match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create an identifier from any string, trimming surrounding whitespace
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// Identifier of a bus address reachable through the bridge
    pub fn gpib(address: u8) -> Self {
        Self(format!("{}{}", GPIB_PREFIX, address))
    }

    /// Get the canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (instruments without a port)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the identifier looks like a bus address
    pub fn is_gpib(&self) -> bool {
        self.0.starts_with(GPIB_PREFIX)
    }

    /// Parse the bus address out of a `GPIB0::<n>` (or `GPIB0::<n>::INSTR`) identifier
    pub fn bus_address(&self) -> Result<u8, TransportError> {
        let rest = self
            .0
            .strip_prefix(GPIB_PREFIX)
            .ok_or_else(|| TransportError::MalformedResource(self.0.clone()))?;
        let number = rest.strip_suffix("::INSTR").unwrap_or(rest);

        match number.parse::<u8>() {
            Ok(address) if address <= MAX_BUS_ADDRESS => Ok(address),
            _ => Err(TransportError::MalformedResource(self.0.clone())),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ResourceId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form_trims() {
        assert_eq!(ResourceId::new("  COM4 "), ResourceId::new("COM4"));
        assert_ne!(ResourceId::new("COM4"), ResourceId::new("com4"));
    }

    #[test]
    fn test_gpib_round_trip() {
        let id = ResourceId::gpib(12);
        assert_eq!(id.as_str(), "GPIB0::12");
        assert!(id.is_gpib());
        assert_eq!(id.bus_address().unwrap(), 12);
    }

    #[test]
    fn test_bus_address_accepts_instr_suffix() {
        let id = ResourceId::new("GPIB0::7::INSTR");
        assert_eq!(id.bus_address().unwrap(), 7);
    }

    #[test]
    fn test_bus_address_rejects_malformed() {
        for raw in ["COM3", "GPIB0::", "GPIB0::abc", "GPIB0::31", "/dev/ttyUSB0"] {
            let err = ResourceId::new(raw).bus_address().unwrap_err();
            assert!(matches!(err, TransportError::MalformedResource(_)), "{raw}");
            assert!(err.is_fatal());
        }
    }
}
