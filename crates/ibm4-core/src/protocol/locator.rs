//! Device discovery
//!
//! Probes candidate ports with `*IDN` and accepts the first one whose answer
//! carries the device signature. Each probe uses a short timeout, so the
//! worst case is roughly `timeout * ports`.

use std::time::Duration;
use tracing::{debug, info};

use super::commands::Command;
use super::response::signature_line;
use super::serial::{list_ports, SerialTransport};
use super::transport::{ReadTerminator, SerialSettings, Transport};
use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_PROBE_TIMEOUT_MS, DEVICE_SIGNATURE};

/// Opens a transport on a named port
pub trait PortOpener {
    /// Transport produced for each port
    type Port: Transport;

    /// Open `name` with `settings`
    fn open(&mut self, name: &str, settings: &SerialSettings) -> Result<Self::Port, ProtocolError>;
}

impl<F, T> PortOpener for F
where
    F: FnMut(&str, &SerialSettings) -> Result<T, ProtocolError>,
    T: Transport,
{
    type Port = T;

    fn open(&mut self, name: &str, settings: &SerialSettings) -> Result<T, ProtocolError> {
        self(name, settings)
    }
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    type Port = SerialTransport;

    fn open(
        &mut self,
        name: &str,
        settings: &SerialSettings,
    ) -> Result<SerialTransport, ProtocolError> {
        SerialTransport::open(name, settings)
    }
}

/// Finds the first port hosting an IBM4
pub struct Locator<O = SerialOpener> {
    opener: O,
    settings: SerialSettings,
    signature: String,
    terminator: ReadTerminator,
}

impl Default for Locator<SerialOpener> {
    fn default() -> Self {
        Self::new(
            DEFAULT_BAUD_RATE,
            Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        )
    }
}

impl Locator<SerialOpener> {
    /// Locator probing real ports at `baud_rate` with a per-port timeout
    pub fn new(baud_rate: u32, probe_timeout: Duration) -> Self {
        Self::with_opener(SerialOpener, SerialSettings::probe(baud_rate, probe_timeout))
    }

    /// Probe every platform-visible port
    pub fn find_first(&mut self) -> Result<String, ProtocolError> {
        let candidates = list_ports()?;
        self.find_first_in(&candidates)
    }
}

impl<O: PortOpener> Locator<O> {
    /// Locator opening ports through `opener`
    pub fn with_opener(opener: O, settings: SerialSettings) -> Self {
        Self {
            opener,
            settings,
            signature: DEVICE_SIGNATURE.to_string(),
            terminator: Self::identify_terminator(true),
        }
    }

    /// Substring the identification line must contain
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Whether the device echoes `*IDN` before answering
    pub fn echo_commands(mut self, echo: bool) -> Self {
        self.terminator = Self::identify_terminator(echo);
        self
    }

    fn identify_terminator(echo: bool) -> ReadTerminator {
        let terminator = ReadTerminator::payload(0);
        if echo {
            terminator.after_echo(&Command::Identify.encode())
        } else {
            terminator
        }
    }

    /// Probe `candidates` in order, stopping at the first match
    pub fn find_first_in(&mut self, candidates: &[String]) -> Result<String, ProtocolError> {
        self.settings.validate()?;

        for name in candidates {
            match self.probe(name) {
                Ok(true) => {
                    info!("find_first: IBM4 found at {}", name);
                    return Ok(name.clone());
                }
                Ok(false) => debug!("find_first: {} is not an IBM4", name),
                Err(e @ ProtocolError::ConfigurationError(_)) => return Err(e),
                Err(e) if e.is_port_open_failure() => {
                    debug!("find_first: {} cannot be opened: {}", name, e)
                }
                Err(e) => debug!("find_first: probe of {} failed: {}", name, e),
            }
        }

        Err(ProtocolError::NotFound)
    }

    fn probe(&mut self, name: &str) -> Result<bool, ProtocolError> {
        debug!("probe: trying {}", name);
        let mut port = self.opener.open(name, &self.settings)?;

        let result = port
            .write(&Command::Identify.to_bytes())
            .and_then(|_| port.read_until(&self.terminator));
        port.close();

        let response = result?;
        Ok(signature_line(&response, &self.signature).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockTransport;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stops_at_first_match() {
        let opened = RefCell::new(Vec::new());
        let opener = |name: &str, _: &SerialSettings| {
            opened.borrow_mut().push(name.to_string());
            let reply = match name {
                "p1" => "*IDN\r\nSomething else\r\n",
                _ => "*IDN\r\nISBY-UCC-RevA.1\r\n",
            };
            Ok::<_, ProtocolError>(MockTransport::new(name).with_responses([reply]))
        };
        let mut locator = Locator::with_opener(opener, SerialSettings::default());

        let found = locator.find_first_in(&ports(&["p1", "p2", "p3"])).unwrap();
        assert_eq!(found, "p2");
        assert_eq!(*opened.borrow(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn test_busy_ports_are_skipped() {
        let opener = |name: &str, _: &SerialSettings| match name {
            "busy" => Err(ProtocolError::PortBusy(name.to_string())),
            "gone" => Err(ProtocolError::PortUnavailable {
                port: name.to_string(),
                reason: "no such device".to_string(),
            }),
            _ => Ok(MockTransport::new(name).with_responses(["*IDN\r\nISBY-UCC-RevB.2\r\n"])),
        };
        let mut locator = Locator::with_opener(opener, SerialSettings::default());
        let found = locator
            .find_first_in(&ports(&["busy", "gone", "ibm4"]))
            .unwrap();
        assert_eq!(found, "ibm4");
    }

    #[test]
    fn test_probe_closes_non_matching_ports() {
        let logs = RefCell::new(Vec::new());
        let opener = |name: &str, _: &SerialSettings| {
            let mock = MockTransport::new(name).with_responses(["nope\r\n"]);
            logs.borrow_mut().push(mock.log());
            Ok::<_, ProtocolError>(mock)
        };
        let mut locator = Locator::with_opener(opener, SerialSettings::default());
        assert!(matches!(
            locator.find_first_in(&ports(&["a", "b"])),
            Err(ProtocolError::NotFound)
        ));
        for log in logs.borrow().iter() {
            assert_eq!(
                log.calls().last(),
                Some(&crate::protocol::mock::TransportCall::Close)
            );
        }
    }

    #[test]
    fn test_ports_failing_after_open_are_skipped() {
        let opener = |name: &str, _: &SerialSettings| {
            Ok::<_, ProtocolError>(match name {
                "stuck" => MockTransport::new(name).failing_writes(),
                _ => MockTransport::new(name).with_responses(["*IDN\r\nISBY-UCC-RevA.1\r\n"]),
            })
        };
        let mut locator = Locator::with_opener(opener, SerialSettings::default());
        assert_eq!(locator.find_first_in(&ports(&["stuck", "ibm4"])).unwrap(), "ibm4");
    }

    #[test]
    fn test_non_echoing_device() {
        let opener = |name: &str, _: &SerialSettings| {
            Ok::<_, ProtocolError>(MockTransport::new(name).with_responses(["ISBY-UCC-RevA.1\r\n"]))
        };
        let mut locator =
            Locator::with_opener(opener, SerialSettings::default()).echo_commands(false);
        assert_eq!(locator.find_first_in(&ports(&["x"])).unwrap(), "x");
    }

    #[test]
    fn test_empty_candidate_list_is_not_found() {
        let opener =
            |name: &str, _: &SerialSettings| Ok::<_, ProtocolError>(MockTransport::new(name));
        let mut locator = Locator::with_opener(opener, SerialSettings::default());
        assert!(matches!(
            locator.find_first_in(&[]),
            Err(ProtocolError::NotFound)
        ));
    }

    #[test]
    fn test_custom_signature() {
        let opener = |name: &str, _: &SerialSettings| {
            Ok::<_, ProtocolError>(MockTransport::new(name).with_responses(["*IDN\r\nBENCH-7\r\n"]))
        };
        let mut locator =
            Locator::with_opener(opener, SerialSettings::default()).signature("BENCH");
        assert_eq!(locator.find_first_in(&ports(&["x"])).unwrap(), "x");
    }
}
