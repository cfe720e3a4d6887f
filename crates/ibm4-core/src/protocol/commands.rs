//! Protocol commands
//!
//! Defines the command lines understood by the IBM4 firmware. Each command is
//! built fresh for one exchange and rendered as `<Verb><Index>:<Arg>\r\n`.

use serde::{Deserialize, Serialize};

use super::channel::{require_pwm_pin, Channel, ReadMode};
use super::{ProtocolError, LINE_ENDING, VMAX, VMIN};

/// How the device should return samples for a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadKind {
    /// N raw samples as voltages
    Raw,
    /// One on-chip average of N samples
    Average,
    /// N raw samples as ADC counts
    Binary,
}

impl ReadKind {
    /// Map the `(averaging, binary)` flag pair onto a read kind.
    ///
    /// The firmware has no averaged binary read, so setting both flags fails.
    pub fn from_flags(averaging: bool, binary: bool) -> Result<Self, ProtocolError> {
        match (averaging, binary) {
            (false, false) => Ok(ReadKind::Raw),
            (true, false) => Ok(ReadKind::Average),
            (false, true) => Ok(ReadKind::Binary),
            (true, true) => Err(ProtocolError::ConfigurationError(
                "averaged binary reads are not supported by the firmware".to_string(),
            )),
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            ReadKind::Raw => "Read",
            ReadKind::Average => "Average",
            ReadKind::Binary => "BRead",
        }
    }

    /// Number of numeric tokens the payload carries for `samples` samples
    pub fn tokens_for(&self, samples: u32) -> usize {
        match self {
            ReadKind::Average => 1,
            ReadKind::Raw | ReadKind::Binary => samples as usize,
        }
    }
}

/// A command line for the IBM4
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// `*IDN`
    Identify,
    /// `Mode<idx>`
    SetMode(ReadMode),
    /// `Write<idx>:<v.vv>`, index is the output wire index
    WriteVoltage {
        /// Output wire index
        index: u8,
        /// Volts, sent with two decimals
        volts: f64,
    },
    /// `PWM<pin>:<pct>`
    WritePwm {
        /// PWM-capable pin number
        pin: u8,
        /// Duty in percent
        percentage: u32,
    },
    /// `Read`/`Average`/`BRead<idx>:<n>`, index is the input wire index
    Read {
        /// Input wire index
        index: u8,
        /// Samples requested
        samples: u32,
        /// Verb family
        kind: ReadKind,
    },
    /// `Diff_Read`/`Diff_Average`/`Diff_BRead<pos>:<neg>:<n>`
    DiffRead {
        /// Positive input wire index
        positive: u8,
        /// Negative input wire index
        negative: u8,
        /// Samples requested
        samples: u32,
        /// Verb family
        kind: ReadKind,
    },
}

impl Command {
    /// Output-voltage command; rejects non-output channels and voltages
    /// outside [VMIN, VMAX)
    pub fn write_voltage(channel: Channel, volts: f64) -> Result<Self, ProtocolError> {
        let index = channel.require_output()?;
        if !(VMIN..VMAX).contains(&volts) {
            return Err(ProtocolError::OutOfRange {
                quantity: "voltage",
                value: volts,
                min: VMIN,
                max: VMAX,
            });
        }
        Ok(Command::WriteVoltage { index, volts })
    }

    /// PWM duty command; `percentage` must be in [0, 101)
    pub fn write_pwm(pin: u8, percentage: u32) -> Result<Self, ProtocolError> {
        let pin = require_pwm_pin(pin)?;
        if percentage >= 101 {
            return Err(ProtocolError::OutOfRange {
                quantity: "PWM percentage",
                value: percentage as f64,
                min: 0.0,
                max: 101.0,
            });
        }
        Ok(Command::WritePwm { pin, percentage })
    }

    /// Single-channel read; rejects non-input channels
    pub fn read(channel: Channel, samples: u32, kind: ReadKind) -> Result<Self, ProtocolError> {
        let index = channel.require_input()?;
        Ok(Command::Read {
            index,
            samples,
            kind,
        })
    }

    /// Differential read; both channels must be inputs and must differ
    pub fn diff_read(
        positive: Channel,
        negative: Channel,
        samples: u32,
        kind: ReadKind,
    ) -> Result<Self, ProtocolError> {
        let pos = positive.require_input()?;
        let neg = negative.require_input()?;
        if pos == neg {
            return Err(ProtocolError::InvalidChannel(format!(
                "positive and negative channels are both {}",
                positive
            )));
        }
        Ok(Command::DiffRead {
            positive: pos,
            negative: neg,
            samples,
            kind,
        })
    }

    /// Check if this command expects a response line
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Command::Identify | Command::Read { .. } | Command::DiffRead { .. }
        )
    }

    /// Number of numeric tokens to take from the end of the response
    pub fn expected_tokens(&self) -> usize {
        match self {
            Command::Read { samples, kind, .. } | Command::DiffRead { samples, kind, .. } => {
                kind.tokens_for(*samples)
            }
            _ => 0,
        }
    }

    /// Render the command line, including the trailing CRLF
    pub fn encode(&self) -> String {
        let body = match self {
            Command::Identify => "*IDN".to_string(),
            Command::SetMode(mode) => format!("Mode{}", mode.wire_index()),
            Command::WriteVoltage { index, volts } => format!("Write{}:{:.2}", index, volts),
            Command::WritePwm { pin, percentage } => format!("PWM{}:{}", pin, percentage),
            Command::Read {
                index,
                samples,
                kind,
            } => format!("{}{}:{}", kind.verb(), index, samples),
            Command::DiffRead {
                positive,
                negative,
                samples,
                kind,
            } => format!("Diff_{}{}:{}:{}", kind.verb(), positive, negative, samples),
        };
        body + LINE_ENDING
    }

    /// Encoded line as bytes for the transport
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

/// Encode `Write<idx>:<volts>`
pub fn encode_write_voltage(channel: Channel, volts: f64) -> Result<String, ProtocolError> {
    Command::write_voltage(channel, volts).map(|c| c.encode())
}

/// Encode `PWM<pin>:<pct>` for the default pin
pub fn encode_write_pwm(percentage: u32) -> Result<String, ProtocolError> {
    Command::write_pwm(super::channel::DEFAULT_PWM_PIN, percentage).map(|c| c.encode())
}

/// Encode `Mode<idx>`
pub fn encode_set_mode(mode: ReadMode) -> String {
    Command::SetMode(mode).encode()
}

/// Encode a single-channel read
pub fn encode_read(
    channel: Channel,
    samples: u32,
    averaging: bool,
    binary: bool,
) -> Result<String, ProtocolError> {
    let kind = ReadKind::from_flags(averaging, binary)?;
    Command::read(channel, samples, kind).map(|c| c.encode())
}

/// Encode a differential read
pub fn encode_diff_read(
    positive: Channel,
    negative: Channel,
    samples: u32,
    averaging: bool,
    binary: bool,
) -> Result<String, ProtocolError> {
    let kind = ReadKind::from_flags(averaging, binary)?;
    Command::diff_read(positive, negative, samples, kind).map(|c| c.encode())
}
