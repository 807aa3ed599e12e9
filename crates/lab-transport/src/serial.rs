//! Raw serial port transport

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::{decode_reply, ResourceId, Transport, TransportKind, TransportOptions};

/// Serial connection to one device
pub struct SerialTransport {
    resource: ResourceId,
    port: Option<Box<dyn SerialPort>>,
    terminator: String,
    timeout: Duration,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("resource", &self.resource)
            .field("open", &self.port.is_some())
            .field("terminator", &self.terminator)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SerialTransport {
    /// Open a serial port
    pub fn open(resource: &ResourceId, options: &TransportOptions) -> Result<Self, TransportError> {
        let baud_rate = options.baud_rate_or_default();
        for key in options.extra.keys() {
            debug!("serial transport ignores option {:?} for {}", key, resource);
        }

        debug!("Opening {} at {} baud", resource, baud_rate);
        let port = serialport::new(resource.as_str(), baud_rate)
            .timeout(options.timeout)
            .open()
            .map_err(|e| TransportError::Connection {
                resource: resource.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            resource: resource.clone(),
            port: Some(port),
            terminator: options.terminator.clone(),
            timeout: options.timeout,
        })
    }

    /// Read up to `limit` bytes, or up to and including the next newline
    fn read_raw(&mut self, limit: Option<usize>) -> Result<Vec<u8>, TransportError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.to_string()))?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if limit.is_some_and(|n| line.len() >= n) {
                break;
            }
            match port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if limit.is_none() && byte[0] == b'\n' {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => {
                    return Err(TransportError::Io {
                        resource: self.resource.to_string(),
                        source: e,
                    })
                }
            }
        }

        Ok(line)
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn resource(&self) -> &ResourceId {
        &self.resource
    }

    fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| TransportError::Closed(self.resource.to_string()))?;

        let data = format!("{}{}", payload, self.terminator);
        trace!("{} <- {:?}", self.resource, data);
        port.write_all(data.as_bytes())
            .and_then(|()| port.flush())
            .map_err(|e| TransportError::Io {
                resource: self.resource.to_string(),
                source: e,
            })
    }

    fn read(&mut self, max_bytes: Option<usize>) -> Result<String, TransportError> {
        let raw = self.read_raw(max_bytes)?;
        trace!("{} -> {:?}", self.resource, String::from_utf8_lossy(&raw));
        Ok(decode_reply(&raw))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<Duration, TransportError> {
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(timeout)?;
        }
        Ok(std::mem::replace(&mut self.timeout, timeout))
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        if let Some(port) = self.port.as_ref() {
            port.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialTransport::open(
            &ResourceId::new("/dev/this-port-does-not-exist"),
            &TransportOptions::default().with_timeout(Duration::from_millis(10)),
        );
        assert!(matches!(result, Err(TransportError::Connection { .. })));
    }
}
