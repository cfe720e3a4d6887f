//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to an IBM4
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The OS could not bind the port
    #[error("Port unavailable: {port}: {reason}")]
    PortUnavailable {
        /// Port name
        port: String,
        /// OS error text
        reason: String,
    },

    /// The port is held by another process or denied to this one
    #[error("Port busy: {0}")]
    PortBusy(String),

    /// Invalid settings, flags or config file
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    /// A command write did not finish within the write timeout
    #[error("Write timed out")]
    WriteTimeout,

    /// Nothing at all came back before the read timeout
    #[error("Read timed out with no response")]
    ReadTimeout,

    /// Any other OS-level serial failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Fewer numeric tokens than the command asked for
    #[error("Malformed response: expected {expected} numeric token(s), found {found} in {response:?}")]
    MalformedResponse {
        /// Tokens the command needs
        expected: usize,
        /// Tokens actually present
        found: usize,
        /// Raw response, lossy-decoded
        response: String,
    },

    /// Unknown channel label, or a channel used on the wrong side
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Unknown read mode label
    #[error("Invalid read mode: {0}")]
    InvalidMode(String),

    /// A value outside `[min, max)`
    #[error("{quantity} out of range: {value} not in [{min}, {max})")]
    OutOfRange {
        /// What was checked, e.g. "voltage" or "sample count"
        quantity: &'static str,
        /// Rejected value
        value: f64,
        /// Inclusive lower bound
        min: f64,
        /// Exclusive upper bound
        max: f64,
    },

    /// The session is closed
    #[error("Not connected to IBM4")]
    NotConnected,

    /// No probed port answered with the device signature
    #[error("No IBM4 found on any serial port")]
    NotFound,

    /// Port listing is not implemented for this OS family
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The identification line lacks the device signature
    #[error("Signature mismatch: expected '{expected}', got '{actual}'")]
    SignatureMismatch {
        /// Substring that was required
        expected: String,
        /// Line the device sent
        actual: String,
    },
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::InvalidInput => {
                ProtocolError::ConfigurationError(err.description)
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => ProtocolError::WriteTimeout,
            _ => ProtocolError::SerialError(err.description),
        }
    }
}

impl ProtocolError {
    /// Classify a failure to open `port`.
    ///
    /// Permission and in-use errors are reported as [`ProtocolError::PortBusy`],
    /// everything else as [`ProtocolError::PortUnavailable`].
    pub(crate) fn open_failure(port: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::InvalidInput => {
                ProtocolError::ConfigurationError(err.description)
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
            | serialport::ErrorKind::Io(std::io::ErrorKind::AddrInUse)
            | serialport::ErrorKind::Io(std::io::ErrorKind::WouldBlock) => {
                ProtocolError::PortBusy(format!("{}: {}", port, err.description))
            }
            _ => ProtocolError::PortUnavailable {
                port: port.to_string(),
                reason: err.description,
            },
        }
    }

    /// True for open failures that are expected while probing ports occupied
    /// by other devices
    pub fn is_port_open_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::PortBusy(_) | ProtocolError::PortUnavailable { .. }
        )
    }
}
