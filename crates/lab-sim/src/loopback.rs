//! Loopback transport
//!
//! Every write is echoed back, terminator included, as the next reply.

use std::collections::VecDeque;
use std::time::Duration;

use lab_transport::{
    strip_line_terminator, ResourceId, Transport, TransportError, TransportKind, TransportOptions,
};

/// Transport that echoes writes back to the reader
#[derive(Debug)]
pub struct LoopbackTransport {
    resource: ResourceId,
    terminator: String,
    timeout: Duration,
    echoed: VecDeque<String>,
    open: bool,
}

impl LoopbackTransport {
    /// Create an open loopback transport
    pub fn new(resource: impl Into<ResourceId>, options: &TransportOptions) -> Self {
        Self {
            resource: resource.into(),
            terminator: options.terminator.clone(),
            timeout: options.timeout,
            echoed: VecDeque::new(),
            open: true,
        }
    }

    /// Raw bytes waiting to be read, terminators included
    pub fn pending(&self) -> Vec<String> {
        self.echoed.iter().cloned().collect()
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        self.echoed.push_back(format!("{}{}", payload, self.terminator));
        Ok(())
    }

    fn read(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.resource.to_string()));
        }
        let Some(mut raw) = self.echoed.pop_front() else {
            return Ok(String::new());
        };
        if let Some(n) = max_bytes {
            if n < raw.len() {
                let rest = raw.split_off(n);
                self.echoed.push_front(rest);
            }
        }
        Ok(strip_line_terminator(&raw).to_string())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        Ok(std::mem::replace(&mut self.timeout, timeout))
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.echoed.clear();
        Ok(())
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
    use proptest::prelude::*;

    #[test]
    fn test_echo_strips_terminator() {
        for term in ["\n", "\r\n"] {
            let options = TransportOptions::default().with_terminator(term);
            let mut t = LoopbackTransport::new("COM1", &options);

            t.write("CMD").unwrap();
            assert_eq!(t.pending(), vec![format!("CMD{}", term)]);
            assert_eq!(t.read(None).unwrap(), "CMD");
        }
    }

    #[test]
    fn test_empty_read_is_timeout() {
        let mut t = LoopbackTransport::new("COM1", &TransportOptions::default());
        assert_eq!(t.read(None).unwrap(), "");
    }

    #[test]
    fn test_max_bytes_splits_reply() {
        let mut t = LoopbackTransport::new("COM1", &TransportOptions::default());
        t.write("ABCDEF").unwrap();

        assert_eq!(t.read(Some(3)).unwrap(), "ABC");
        assert_eq!(t.read(None).unwrap(), "DEF");
    }

    proptest! {
        #[test]
        fn write_then_read_returns_payload(
            cmd in "[A-Z*?:; 0-9]{1,24}",
            term in prop_oneof![Just("\n"), Just("\r\n")]
        ) {
            let options = TransportOptions::default().with_terminator(term);
            let mut t = LoopbackTransport::new("COM1", &options);

            t.write(&cmd).unwrap();
            prop_assert_eq!(t.read(None).unwrap(), cmd);
        }
    }
}
