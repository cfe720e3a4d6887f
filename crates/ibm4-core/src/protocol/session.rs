//! Session management
//!
//! A [`Session`] exclusively owns one transport and enforces the pairing
//! discipline of the protocol: every command that expects a response is
//! followed by exactly one terminated read and exactly one input-buffer
//! reset before anything else is written. The device streams everything into
//! one byte stream with no request identifiers, so a session must never be
//! shared without an external lock held across that whole triple.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::channel::{Channel, ReadMode, DEFAULT_PWM_PIN};
use super::commands::{Command, ReadKind};
use super::locator::Locator;
use super::response::{decode_floats, decode_integers, payload_line, signature_line, MultiReading};
use super::serial::SerialTransport;
use super::transport::{ReadTerminator, Transport};
use super::ProtocolError;
use crate::config::SessionConfig;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport bound
    Closed,
    /// Transport bound and outputs zeroed
    Open,
}

/// Connection to one IBM4
pub struct Session<T: Transport = SerialTransport> {
    transport: Option<T>,
    state: SessionState,
    config: SessionConfig,
    mode: Option<ReadMode>,
    signature: Option<String>,
    /// A fire-and-forget command was written since the last input reset, so
    /// its echo may still be queued
    echo_pending: bool,
}

impl Session<SerialTransport> {
    /// Open a session on `config.port_name`, or on the first IBM4 found when
    /// no port is configured
    pub fn open(config: SessionConfig) -> Result<Self, ProtocolError> {
        config.validate()?;

        let port_name = match &config.port_name {
            Some(name) => name.clone(),
            None => Locator::new(config.baud_rate, config.probe_timeout())
                .signature(config.device_signature.clone())
                .echo_commands(config.echo_commands)
                .find_first()?,
        };

        let transport = SerialTransport::open(&port_name, &config.serial_settings())?;
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> Session<T> {
    /// Bind an already-open transport.
    ///
    /// Runs the identification handshake when configured, selects the read
    /// mode and zeroes all outputs. On any failure the transport is closed
    /// before the error is returned.
    pub fn with_transport(transport: T, config: SessionConfig) -> Result<Self, ProtocolError> {
        config.validate()?;

        let mut session = Self {
            transport: Some(transport),
            state: SessionState::Open,
            config,
            mode: None,
            signature: None,
            echo_pending: false,
        };

        match session.initialize() {
            Ok(()) => {
                info!("open: session ready on {}", session.port_name());
                Ok(session)
            }
            Err(e) => {
                warn!("open: initialization failed: {}", e);
                session.release();
                Err(e)
            }
        }
    }

    fn initialize(&mut self) -> Result<(), ProtocolError> {
        if self.config.identify_on_open {
            let signature = self.identify()?;
            self.signature = Some(signature);
        }
        self.set_mode(self.config.read_mode)?;
        self.zero_outputs()?;
        self.reset_buffer()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read mode last sent to the device
    pub fn mode(&self) -> Option<ReadMode> {
        self.mode
    }

    /// Identification line captured during open
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Settings the session was opened with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Name of the bound port, empty when closed
    pub fn port_name(&self) -> &str {
        self.transport.as_ref().map(|t| t.port_name()).unwrap_or("")
    }

    /// True iff the session is open and the transport reports an open handle
    pub fn comms_status(&self) -> bool {
        self.state == SessionState::Open && self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    fn transport_mut(&mut self) -> Result<&mut T, ProtocolError> {
        if self.state != SessionState::Open {
            return Err(ProtocolError::NotConnected);
        }
        self.transport.as_mut().ok_or(ProtocolError::NotConnected)
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.comms_status() {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    /// Write one command line
    fn send(&mut self, command: &Command) -> Result<(), ProtocolError> {
        let line = command.encode();
        debug!("send: {:?}", line);
        self.transport_mut()?.write(line.as_bytes())?;
        if !command.expects_response() && self.config.echo_commands {
            self.echo_pending = true;
        }
        Ok(())
    }

    /// Terminator for the response to `command`
    fn terminator_for(&self, command: &Command) -> ReadTerminator {
        let terminator = ReadTerminator::payload(command.expected_tokens());
        if self.config.echo_commands {
            terminator.after_echo(&command.encode())
        } else {
            terminator
        }
    }

    /// Write, read one terminated response, reset the input buffer.
    ///
    /// Echoes left by earlier fire-and-forget commands are discarded before
    /// the write. The reset after the read runs even when the read failed so
    /// a partial response cannot bleed into the next exchange.
    fn exchange(&mut self, command: &Command) -> Result<Vec<u8>, ProtocolError> {
        debug_assert!(command.expects_response(), "{:?} has no response", command);
        if self.echo_pending {
            self.reset_buffer()?;
        }
        self.send(command)?;
        let terminator = self.terminator_for(command);
        let transport = self.transport_mut()?;
        let read = transport.read_until(&terminator);
        let reset = transport.reset_input_buffer();
        let response = read?;
        reset?;
        debug!("exchange: received {:?}", String::from_utf8_lossy(&response));
        Ok(response)
    }

    fn check_samples(&self, samples: u32) -> Result<(), ProtocolError> {
        let (min, max) = (self.config.min_samples, self.config.max_samples);
        if samples < min || samples > max {
            return Err(ProtocolError::OutOfRange {
                quantity: "sample count",
                value: samples as f64,
                min: min as f64,
                max: max as f64 + 1.0,
            });
        }
        Ok(())
    }

    fn read_floats(&mut self, command: Command) -> Result<Vec<f64>, ProtocolError> {
        let response = self.exchange(&command)?;
        decode_floats(&response, command.expected_tokens())
    }

    fn read_integers(&mut self, command: Command) -> Result<Vec<i64>, ProtocolError> {
        let response = self.exchange(&command)?;
        decode_integers(&response, command.expected_tokens())
    }

    fn last_value(values: Vec<f64>) -> Result<f64, ProtocolError> {
        values.last().copied().ok_or(ProtocolError::MalformedResponse {
            expected: 1,
            found: 0,
            response: String::new(),
        })
    }

    /// Send `*IDN` and return the identification line.
    ///
    /// Fails with `ReadTimeout` when nothing comes back and with
    /// `SignatureMismatch` when the answer lacks the device signature.
    pub fn identify(&mut self) -> Result<String, ProtocolError> {
        let command = Command::Identify;
        let response = self.exchange(&command)?;
        if response.is_empty() {
            return Err(ProtocolError::ReadTimeout);
        }
        let signature = &self.config.device_signature;
        signature_line(&response, signature).ok_or_else(|| ProtocolError::SignatureMismatch {
            expected: signature.clone(),
            actual: payload_line(&response, &command.encode()).unwrap_or_default(),
        })
    }

    /// Select DC or AC input interpretation for subsequent reads
    pub fn set_mode(&mut self, mode: ReadMode) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.send(&Command::SetMode(mode))?;
        self.mode = Some(mode);
        Ok(())
    }

    /// Drive an analog output; `volts` must be in [0.0, 3.3)
    pub fn write_voltage(&mut self, channel: Channel, volts: f64) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let command = Command::write_voltage(channel, volts)?;
        self.send(&command)
    }

    /// Set the PWM duty on D9
    pub fn write_pwm(&mut self, percentage: u32) -> Result<(), ProtocolError> {
        self.write_pwm_on(DEFAULT_PWM_PIN, percentage)
    }

    /// Set the PWM duty on a PWM-capable pin
    pub fn write_pwm_on(&mut self, pin: u8, percentage: u32) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let command = Command::write_pwm(pin, percentage)?;
        self.send(&command)
    }

    /// Drive both analog outputs and the PWM pin to zero
    pub fn zero_outputs(&mut self) -> Result<(), ProtocolError> {
        for channel in Channel::OUTPUTS {
            self.write_voltage(channel, 0.0)?;
        }
        self.write_pwm(0)
    }

    /// Discard anything queued on the input side
    pub fn reset_buffer(&mut self) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.transport_mut()?.reset_input_buffer()?;
        self.echo_pending = false;
        Ok(())
    }

    /// One sample from an input channel
    pub fn read_single(&mut self, channel: Channel) -> Result<f64, ProtocolError> {
        self.ensure_open()?;
        let values = self.read_floats(Command::read(channel, 1, ReadKind::Raw)?)?;
        Self::last_value(values)
    }

    /// One sample as raw ADC counts
    pub fn read_single_binary(&mut self, channel: Channel) -> Result<i64, ProtocolError> {
        self.ensure_open()?;
        let values = self.read_integers(Command::read(channel, 1, ReadKind::Binary)?)?;
        values.last().copied().ok_or(ProtocolError::MalformedResponse {
            expected: 1,
            found: 0,
            response: String::new(),
        })
    }

    /// On-chip average of `samples` readings
    pub fn read_average(&mut self, channel: Channel, samples: u32) -> Result<f64, ProtocolError> {
        self.ensure_open()?;
        let command = Command::read(channel, samples, ReadKind::Average)?;
        self.check_samples(samples)?;
        Self::last_value(self.read_floats(command)?)
    }

    /// `samples` raw readings with host-side mean and half-range
    pub fn read_multiple(
        &mut self,
        channel: Channel,
        samples: u32,
    ) -> Result<MultiReading<f64>, ProtocolError> {
        self.ensure_open()?;
        let command = Command::read(channel, samples, ReadKind::Raw)?;
        self.check_samples(samples)?;
        Ok(MultiReading::<f64>::from_samples(self.read_floats(command)?))
    }

    /// `samples` raw readings as ADC counts
    pub fn read_multiple_binary(
        &mut self,
        channel: Channel,
        samples: u32,
    ) -> Result<MultiReading<i64>, ProtocolError> {
        self.ensure_open()?;
        let command = Command::read(channel, samples, ReadKind::Binary)?;
        self.check_samples(samples)?;
        Ok(MultiReading::<i64>::from_samples(self.read_integers(command)?))
    }

    /// Averaged reading of every input, in the order A2, A3, A4, A5, D2.
    ///
    /// This is five sequential exchanges, not one.
    pub fn read_all_channels(&mut self, samples: u32) -> Result<[f64; 5], ProtocolError> {
        self.ensure_open()?;
        self.check_samples(samples)?;
        let mut values = [0.0; 5];
        for (slot, channel) in values.iter_mut().zip(Channel::INPUTS) {
            *slot = self.read_average(channel, samples)?;
        }
        Ok(values)
    }

    /// One differential sample `positive - negative`
    pub fn diff_read_single(
        &mut self,
        positive: Channel,
        negative: Channel,
    ) -> Result<f64, ProtocolError> {
        self.ensure_open()?;
        let command = Command::diff_read(positive, negative, 1, ReadKind::Raw)?;
        Self::last_value(self.read_floats(command)?)
    }

    /// On-chip average of `samples` differential readings
    pub fn diff_read_average(
        &mut self,
        positive: Channel,
        negative: Channel,
        samples: u32,
    ) -> Result<f64, ProtocolError> {
        self.ensure_open()?;
        let command = Command::diff_read(positive, negative, samples, ReadKind::Average)?;
        self.check_samples(samples)?;
        Self::last_value(self.read_floats(command)?)
    }

    /// `samples` differential readings with host-side mean and half-range
    pub fn diff_read_multiple(
        &mut self,
        positive: Channel,
        negative: Channel,
        samples: u32,
    ) -> Result<MultiReading<f64>, ProtocolError> {
        self.ensure_open()?;
        let command = Command::diff_read(positive, negative, samples, ReadKind::Raw)?;
        self.check_samples(samples)?;
        Ok(MultiReading::<f64>::from_samples(self.read_floats(command)?))
    }

    /// `samples` differential readings as ADC counts
    pub fn diff_read_binary(
        &mut self,
        positive: Channel,
        negative: Channel,
        samples: u32,
    ) -> Result<MultiReading<i64>, ProtocolError> {
        self.ensure_open()?;
        let command = Command::diff_read(positive, negative, samples, ReadKind::Binary)?;
        self.check_samples(samples)?;
        Ok(MultiReading::<i64>::from_samples(self.read_integers(command)?))
    }

    /// Zero the outputs and release the transport. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.comms_status() {
            if let Err(e) = self.zero_outputs() {
                warn!("close: failed to zero outputs: {}", e);
            }
        }
        self.release();
        info!("close: session closed");
    }

    fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.state = SessionState::Closed;
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::{MockTransport, TransportCall};
    use pretty_assertions::assert_eq;

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            identify_on_open: false,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_open_sends_mode_and_zeroes() {
        let mock = MockTransport::new("sim0");
        let log = mock.log();
        let session = Session::with_transport(mock, quiet_config()).unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.mode(), Some(ReadMode::Dc));
        assert_eq!(
            log.writes(),
            vec!["Mode0\r\n", "Write0:0.00\r\n", "Write1:0.00\r\n", "PWM9:0\r\n"]
        );
        assert_eq!(log.calls().last(), Some(&TransportCall::ResetInputBuffer));
    }

    #[test]
    fn test_identify_on_open() {
        let mock = MockTransport::new("sim0").with_responses(["*IDN\r\nISBY-UCC-RevA.1\r\n"]);
        let session = Session::with_transport(mock, SessionConfig::default()).unwrap();
        assert_eq!(session.signature(), Some("ISBY-UCC-RevA.1"));
    }

    #[test]
    fn test_failed_identify_closes_transport() {
        let mock = MockTransport::new("sim0").with_responses(["*IDN\r\nArduino Uno\r\n"]);
        let log = mock.log();
        match Session::with_transport(mock, SessionConfig::default()) {
            Err(ProtocolError::SignatureMismatch { actual, .. }) => {
                assert_eq!(actual, "Arduino Uno")
            }
            other => panic!("expected SignatureMismatch, got {:?}", other.err()),
        }
        assert_eq!(log.calls().last(), Some(&TransportCall::Close));
        assert!(log.writes().iter().all(|w| !w.starts_with("Write")));
    }

    #[test]
    fn test_silent_device_is_read_timeout() {
        let mock = MockTransport::new("sim0");
        assert!(matches!(
            Session::with_transport(mock, SessionConfig::default()),
            Err(ProtocolError::ReadTimeout)
        ));
    }

    #[test]
    fn test_sample_count_bounds() {
        let mock = MockTransport::new("sim0");
        let log = mock.log();
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        log.clear();
        assert!(matches!(
            session.read_average(Channel::A2, 2),
            Err(ProtocolError::OutOfRange { quantity: "sample count", .. })
        ));
        assert!(matches!(
            session.read_multiple(Channel::A2, 10_001),
            Err(ProtocolError::OutOfRange { .. })
        ));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_read_single_binary() {
        let mock = MockTransport::new("sim0").with_responses(["BRead3:1\r\n40321\r\n"]);
        let log = mock.log();
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        assert_eq!(session.read_single_binary(Channel::A5).unwrap(), 40321);
        assert!(log.writes().contains(&"BRead3:1\r\n".to_string()));
    }

    #[test]
    fn test_write_pwm_on_other_pin() {
        let mock = MockTransport::new("sim0");
        let log = mock.log();
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        session.write_pwm_on(5, 25).unwrap();
        assert_eq!(log.writes().last().map(String::as_str), Some("PWM5:25\r\n"));
        assert!(matches!(
            session.write_pwm_on(4, 25),
            Err(ProtocolError::InvalidChannel(_))
        ));
        assert!(matches!(
            session.write_pwm(101),
            Err(ProtocolError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_closed_session_reports_not_connected() {
        let mock = MockTransport::new("sim0");
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        session.close();
        assert!(!session.comms_status());
        assert!(matches!(
            session.read_single(Channel::A2),
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            session.set_mode(ReadMode::Ac),
            Err(ProtocolError::NotConnected)
        ));
        assert_eq!(session.port_name(), "");
    }

    #[test]
    fn test_reset_runs_even_when_read_is_malformed() {
        let mock = MockTransport::new("sim0").with_responses(["??\r\n"]);
        let log = mock.log();
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        log.clear();
        assert!(matches!(
            session.read_average(Channel::A2, 10),
            Err(ProtocolError::MalformedResponse { .. })
        ));
        assert_eq!(
            log.calls(),
            vec![
                TransportCall::Write(b"Average0:10\r\n".to_vec()),
                TransportCall::ReadUntil,
                TransportCall::ResetInputBuffer,
            ]
        );
    }
}
