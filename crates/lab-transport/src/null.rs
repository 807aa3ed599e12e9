//! Transport for instruments without a communication port

use std::time::Duration;

use tracing::trace;

use crate::error::TransportError;
use crate::{ResourceId, Transport, TransportKind, TransportOptions};

/// A transport that accepts writes and never answers
///
/// Used by instruments such as clocks or random generators that produce
/// their readings locally.
#[derive(Debug)]
pub struct NullTransport {
    resource: ResourceId,
    timeout: Duration,
    open: bool,
}

impl NullTransport {
    /// Create an open null transport
    pub fn new(resource: ResourceId, options: &TransportOptions) -> Self {
        Self {
            resource,
            timeout: options.timeout,
            open: true,
        }
    }
}

impl Transport for NullTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::None
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        trace!("null transport {} discarding {:?}", self.resource, payload);
        Ok(())
    }

    fn read(&mut self, _max_bytes: Option<usize>) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        Ok(String::new())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        Ok(std::mem::replace(&mut self.timeout, timeout))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_transport_lifecycle() {
        let mut t = NullTransport::new(ResourceId::new("TIME"), &TransportOptions::default());
        assert!(t.is_open());
        t.write("anything").unwrap();
        assert_eq!(t.read(None).unwrap(), "");

        t.close();
        t.close();
        assert!(!t.is_open());
        assert!(matches!(t.write("x"), Err(TransportError::Closed(_))));
    }
}
