//! Transport options shared by every backend

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default read/write timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Options recognized uniformly across backends
///
/// `timeout` and `terminator` apply everywhere, `baud_rate` only to serial
/// links. Anything else is kept in `extra` and ignored by backends that
/// don't understand it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Read timeout
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Appended to every write, stripped from the end of every read
    pub terminator: String,
    /// Serial baud rate
    pub baud_rate: Option<u32>,
    /// Backend-specific pass-through keys
    pub extra: BTreeMap<String, String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            terminator: "\n".to_string(),
            baud_rate: None,
            extra: BTreeMap::new(),
        }
    }
}

impl TransportOptions {
    /// Builder-style timeout override
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder-style terminator override
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Builder-style baud rate override
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Add a backend-specific key
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Baud rate to use for serial links
    pub fn baud_rate_or_default(&self) -> u32 {
        self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
