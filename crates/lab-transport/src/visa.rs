//! VISA bus transport
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
//!
//! Talking to real hardware needs the `visa` feature and a system VISA
//! library. Without the feature, [`VisaTransport::open`] fails with
//! [`TransportError::Unsupported`].

use std::time::Duration;

use crate::error::TransportError;
use crate::{ResourceId, Transport, TransportKind, TransportOptions};

#[cfg(feature = "visa")]
use std::io::{Read, Write};

#[cfg(feature = "visa")]
use tracing::{debug, trace};

/// Size of the buffer used for one VISA read
#[cfg(feature = "visa")]
const READ_CHUNK: usize = 1024;

/// Session with one VISA resource
pub struct VisaTransport {
    resource: ResourceId,
    terminator: String,
    timeout: Duration,
    #[cfg(feature = "visa")]
    session: Option<visa_rs::Instrument>,
}

impl std::fmt::Debug for VisaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisaTransport")
            .field("resource", &self.resource)
            .field("terminator", &self.terminator)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisaTransport {
    /// Open a session on a VISA resource
    #[cfg(feature = "visa")]
    pub fn open(resource: &ResourceId, options: &TransportOptions) -> Result<Self, TransportError> {
        use std::ffi::CString;
        use visa_rs::prelude::*;

        let connection_error = |reason: String| TransportError::Connection {
            resource: resource.to_string(),
            reason,
        };

        for key in options.extra.keys() {
            debug!("VISA transport ignores option {:?} for {}", key, resource);
        }

        let rm = DefaultRM::new().map_err(|e| connection_error(e.to_string()))?;
        let name = CString::new(resource.as_str())
            .map_err(|_| TransportError::MalformedResource(resource.to_string()))?;
        let name = visa_rs::VisaString::from(name);
        // TODO: apply the I/O timeout through VI_ATTR_TMO_VALUE; visa-rs only takes the open timeout here
        let session = rm
            .open(&name, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
            .map_err(|e| connection_error(e.to_string()))?;

        debug!("Opened VISA session on {}", resource);
        Ok(Self {
            resource: resource.clone(),
            terminator: options.terminator.clone(),
            timeout: options.timeout,
            session: Some(session),
        })
    }

    /// Open a session on a VISA resource
    #[cfg(not(feature = "visa"))]
    pub fn open(resource: &ResourceId, _options: &TransportOptions) -> Result<Self, TransportError> {
        Err(TransportError::Unsupported(format!(
            "VISA support not enabled, cannot open {}. Rebuild with --features visa",
            resource
        )))
    }

    #[cfg(feature = "visa")]
    fn io_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Io {
            resource: self.resource.to_string(),
            source,
        }
    }
}

#[cfg(feature = "visa")]
impl Transport for VisaTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::BusTransport
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        let data = format!("{}{}", payload, self.terminator);
        trace!("{} <- {:?}", self.resource, data);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.to_string()))?;
        let result = session.write_all(data.as_bytes());
        result.map_err(|e| self.io_error(e))
    }

    fn read(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.to_string()))?;

        let mut buf = vec![0u8; max_bytes.unwrap_or(READ_CHUNK)];
        let result = session.read(&mut buf);
        let n = result.map_err(|e| self.io_error(e))?;
        trace!("{} -> {:?}", self.resource, String::from_utf8_lossy(&buf[..n]));
        Ok(crate::decode_reply(&buf[..n]))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        Ok(std::mem::replace(&mut self.timeout, timeout))
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.to_string()))?;
        let result = session.flush();
        result.map_err(|e| self.io_error(e))
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("Closed VISA session {}", self.resource);
        }
    }
}

#[cfg(not(feature = "visa"))]
impl Transport for VisaTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::BusTransport
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, _payload: &str) -> Result<(), TransportError> {
        Err(TransportError::Closed(self.resource.to_string()))
    }

    fn read(&mut self, _max_bytes: Option<usize>) -> Result<String, TransportError> {
        Err(TransportError::Closed(self.resource.to_string()))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        Ok(std::mem::replace(&mut self.timeout, timeout))
    }

    fn is_open(&self) -> bool {
        false
    }

    fn close(&mut self) {}
}

#[cfg(all(test, not(feature = "visa")))]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_feature_is_unsupported() {
        let result = VisaTransport::open(
            &ResourceId::new("GPIB0::1::INSTR"),
            &TransportOptions::default(),
        );
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }
}
