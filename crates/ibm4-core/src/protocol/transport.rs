//! Transport abstraction
//!
//! A half-duplex, byte-oriented channel to one port. Implementations do not
//! retry; every failure is surfaced to the caller.

use std::time::Duration;

use super::response::decode_numeric_tokens;
use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS};

/// Serial link parameters for opening a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Line speed
    pub baud_rate: u32,
    /// Upper bound on one terminated read
    pub read_timeout: Duration,
    /// Upper bound on one command write
    pub write_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

impl SerialSettings {
    /// Settings for a short identification probe
    pub fn probe(baud_rate: u32, timeout: Duration) -> Self {
        Self {
            baud_rate,
            read_timeout: timeout,
            write_timeout: timeout * 2,
        }
    }

    /// Reject a zero baud rate or zero timeouts
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::ConfigurationError(
                "baud rate must be non-zero".to_string(),
            ));
        }
        if self.read_timeout.is_zero() || self.write_timeout.is_zero() {
            return Err(ProtocolError::ConfigurationError(
                "read and write timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// When a response read is complete.
///
/// A response is complete once the buffer ends on a line break and the lines
/// after the command's echo hold a non-blank payload carrying at least
/// `tokens` numeric tokens. Anything sent before the echo, such as the echo of
/// an earlier fire-and-forget command, is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadTerminator {
    /// Echoed command line, without its line ending, that precedes the payload
    pub echo: Option<String>,
    /// Numeric tokens the payload must carry
    pub tokens: usize,
}

impl ReadTerminator {
    /// Payload of at least `tokens` numeric tokens, not preceded by an echo
    pub fn payload(tokens: usize) -> Self {
        Self { echo: None, tokens }
    }

    /// Require the payload to follow the echo of `line`
    pub fn after_echo(mut self, line: &str) -> Self {
        self.echo = Some(line.trim_end().to_string());
        self
    }

    /// Payload lines of `buffer`, or `None` while the echo has not arrived
    pub fn payload_of<'a>(&self, buffer: &'a str) -> Option<&'a str> {
        let Some(echo) = &self.echo else {
            return Some(buffer);
        };
        let mut offset = 0;
        let mut payload_start = None;
        for line in buffer.split_inclusive('\n') {
            offset += line.len();
            if line.trim_end() == echo {
                payload_start = Some(offset);
            }
        }
        payload_start.map(|start| &buffer[start..])
    }

    /// True once `buffer` holds the complete payload
    pub fn is_complete(&self, buffer: &[u8]) -> bool {
        if !buffer.ends_with(b"\n") {
            return false;
        }
        let text = String::from_utf8_lossy(buffer);
        match self.payload_of(&text) {
            Some(payload) => {
                !payload.trim().is_empty() && decode_numeric_tokens(payload.as_bytes()).len() >= self.tokens
            }
            None => false,
        }
    }
}

/// Byte channel to one IBM4
pub trait Transport {
    /// Name of the port this transport is bound to
    fn port_name(&self) -> &str;

    /// Write all bytes, blocking up to the write timeout
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError>;

    /// Accumulate bytes until `terminator` is satisfied or the read timeout
    /// elapses. On timeout the bytes gathered so far are returned, possibly
    /// none.
    fn read_until(&mut self, terminator: &ReadTerminator) -> Result<Vec<u8>, ProtocolError>;

    /// Discard everything queued for reading
    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError>;

    /// Whether the underlying handle is still open
    fn is_open(&self) -> bool;

    /// Release the handle. Closing twice is a no-op.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn port_name(&self) -> &str {
        (**self).port_name()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        (**self).write(bytes)
    }

    fn read_until(&mut self, terminator: &ReadTerminator) -> Result<Vec<u8>, ProtocolError> {
        (**self).read_until(terminator)
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        (**self).reset_input_buffer()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
