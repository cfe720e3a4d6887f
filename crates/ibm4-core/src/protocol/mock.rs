//! Scripted transport for tests
//!
//! Delivers one canned chunk into its input queue per `read_until` call and
//! hands back the shortest prefix of that queue that satisfies the
//! terminator, leaving the rest queued until the next read or reset. Every
//! call is recorded into a [`CallLog`] that outlives the transport so call
//! ordering can be checked after a session has been dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::transport::{ReadTerminator, Transport};
use super::ProtocolError;

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// Bytes written
    Write(Vec<u8>),
    /// A terminated read
    ReadUntil,
    /// An input-buffer reset
    ResetInputBuffer,
    /// The handle was released
    Close,
}

/// Shared record of transport calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<TransportCall>>>);

impl CallLog {
    fn push(&self, call: TransportCall) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    /// Snapshot of all calls so far
    pub fn calls(&self) -> Vec<TransportCall> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Written command lines, lossy-decoded
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Write(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

/// Transport double with scripted responses
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    open: bool,
    responses: VecDeque<Vec<u8>>,
    input: Vec<u8>,
    echo: bool,
    log: CallLog,
    writes_before_failure: Option<usize>,
}

impl MockTransport {
    /// Silent open transport named `name`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            open: true,
            responses: VecDeque::new(),
            input: Vec::new(),
            echo: false,
            log: CallLog::default(),
            writes_before_failure: None,
        }
    }

    /// Queue chunks, one delivered per read
    pub fn with_responses<I, B>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        self.responses
            .extend(responses.into_iter().map(|r| r.as_ref().to_vec()));
        self
    }

    /// Echo every written byte into the input queue, like the firmware does
    pub fn echoing(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Make every write fail with [`ProtocolError::WriteTimeout`]
    pub fn failing_writes(self) -> Self {
        self.failing_writes_after(0)
    }

    /// Accept `count` writes, then fail every later one with
    /// [`ProtocolError::WriteTimeout`]
    pub fn failing_writes_after(mut self, count: usize) -> Self {
        self.writes_before_failure = Some(count);
        self
    }

    /// Handle on the call log
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Transport for MockTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.log.push(TransportCall::Write(bytes.to_vec()));
        match &mut self.writes_before_failure {
            Some(0) => return Err(ProtocolError::WriteTimeout),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        if self.echo {
            self.input.extend_from_slice(bytes);
        }
        Ok(bytes.len())
    }

    fn read_until(&mut self, terminator: &ReadTerminator) -> Result<Vec<u8>, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.log.push(TransportCall::ReadUntil);
        if let Some(chunk) = self.responses.pop_front() {
            self.input.extend_from_slice(&chunk);
        }
        let end = (1..=self.input.len())
            .find(|&i| terminator.is_complete(&self.input[..i]))
            .unwrap_or(self.input.len());
        Ok(self.input.drain(..end).collect())
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.log.push(TransportCall::ResetInputBuffer);
        self.input.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.push(TransportCall::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_plays_back_in_order() {
        let mut mock = MockTransport::new("sim0").with_responses(["first\r\n", "second\r\n"]);
        let term = ReadTerminator::payload(0);
        assert_eq!(mock.read_until(&term).unwrap(), b"first\r\n".to_vec());
        assert_eq!(mock.read_until(&term).unwrap(), b"second\r\n".to_vec());
        assert!(mock.read_until(&term).unwrap().is_empty());
    }

    #[test]
    fn test_read_stops_at_terminator() {
        let mut mock = MockTransport::new("sim0").with_responses(["Read0:1\r\n0.5\r\nRead1:1\r\n"]);
        let term = ReadTerminator::payload(1).after_echo("Read0:1");
        assert_eq!(mock.read_until(&term).unwrap(), b"Read0:1\r\n0.5\r\n".to_vec());
        mock.reset_input_buffer().unwrap();
        assert!(mock.read_until(&term).unwrap().is_empty());
    }

    #[test]
    fn test_echoing_queues_written_lines() {
        let mut mock = MockTransport::new("sim0").echoing();
        mock.write(b"Write0:1.00\r\n").unwrap();
        let all = mock.read_until(&ReadTerminator::payload(0).after_echo("*IDN")).unwrap();
        assert_eq!(all, b"Write0:1.00\r\n".to_vec());
    }

    #[test]
    fn test_mock_write_failure() {
        let mut mock = MockTransport::new("sim0").failing_writes_after(1);
        assert!(mock.write(b"Mode0\r\n").is_ok());
        assert!(matches!(
            mock.write(b"test"),
            Err(ProtocolError::WriteTimeout)
        ));
    }

    #[test]
    fn test_close_is_recorded_once() {
        let mut mock = MockTransport::new("sim0");
        let log = mock.log();
        mock.close();
        mock.close();
        assert_eq!(log.calls(), vec![TransportCall::Close]);
        assert!(mock.write(b"x").is_err());
    }
}
