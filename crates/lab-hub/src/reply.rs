//! Replies to instrument queries

use crate::error::CommandFault;

/// Outcome of [`InstrumentConnection::ask`](crate::InstrumentConnection::ask)
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The instrument answered (possibly with an empty string on timeout)
    Text(String),
    /// The exchange failed; the fault has already been logged
    Failed(CommandFault),
}

impl Reply {
    /// Whether the exchange completed
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Text(_))
    }

    /// The reply text, if the exchange completed
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            Reply::Failed(_) => None,
        }
    }

    /// The fault, if the exchange failed
    pub fn fault(&self) -> Option<&CommandFault> {
        match self {
            Reply::Text(_) => None,
            Reply::Failed(fault) => Some(fault),
        }
    }

    /// Parse the reply as a number
    ///
    /// Failed exchanges and unparsable text both yield NaN, the sentinel
    /// measurement loops record for a missing point.
    pub fn as_f64(&self) -> f64 {
        self.text()
            .and_then(|t| t.trim().parse().ok())
            .unwrap_or(f64::NAN)
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<String, CommandFault> {
        match self {
            Reply::Text(text) => Ok(text),
            Reply::Failed(fault) => Err(fault),
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Text(text) => f.write_str(text),
            Reply::Failed(_) => f.write_str("NaN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_parsing() {
        assert_eq!(Reply::Text("+077.350".to_string()).as_f64(), 77.35);
        assert_eq!(Reply::Text(" 1e-3 ".to_string()).as_f64(), 0.001);
        assert!(Reply::Text("OVLD".to_string()).as_f64().is_nan());
    }

    #[test]
    fn test_failed_reply_is_nan() {
        let reply = Reply::Failed(CommandFault {
            command: "KRDG? A".to_string(),
            instrument: "LS340".to_string(),
            reason: "broken pipe".to_string(),
        });
        assert!(!reply.is_ok());
        assert!(reply.as_f64().is_nan());
        assert_eq!(reply.to_string(), "NaN");
        assert!(reply.into_result().is_err());
    }
}
