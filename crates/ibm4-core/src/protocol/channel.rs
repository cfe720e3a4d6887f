//! Channel and read-mode identifiers
//!
//! The board exposes two disjoint sets of pins: five inputs (four analog
//! lines plus D2, which can be sampled as an analog source) and two analog
//! outputs. The pin-to-wire-index table is fixed by the firmware.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// A named pin on the IBM4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Analog output 0
    A0,
    /// Analog output 1
    A1,
    /// Analog input 0
    A2,
    /// Analog input 1
    A3,
    /// Analog input 2
    A4,
    /// Analog input 3
    A5,
    /// Digital pin 2, read as an analog source
    D2,
}

impl Channel {
    /// Input channels in wire-index order
    pub const INPUTS: [Channel; 5] = [
        Channel::A2,
        Channel::A3,
        Channel::A4,
        Channel::A5,
        Channel::D2,
    ];

    /// Output channels in wire-index order
    pub const OUTPUTS: [Channel; 2] = [Channel::A0, Channel::A1];

    /// Pin label as printed on the board
    pub fn label(&self) -> &'static str {
        match self {
            Channel::A0 => "A0",
            Channel::A1 => "A1",
            Channel::A2 => "A2",
            Channel::A3 => "A3",
            Channel::A4 => "A4",
            Channel::A5 => "A5",
            Channel::D2 => "D2",
        }
    }

    /// Wire index used by read commands, `None` for output pins
    pub fn input_index(&self) -> Option<u8> {
        match self {
            Channel::A2 => Some(0),
            Channel::A3 => Some(1),
            Channel::A4 => Some(2),
            Channel::A5 => Some(3),
            Channel::D2 => Some(4),
            Channel::A0 | Channel::A1 => None,
        }
    }

    /// Wire index used by write commands, `None` for input pins
    pub fn output_index(&self) -> Option<u8> {
        match self {
            Channel::A0 => Some(0),
            Channel::A1 => Some(1),
            _ => None,
        }
    }

    /// Member of [`Channel::INPUTS`]
    pub fn is_input(&self) -> bool {
        self.input_index().is_some()
    }

    /// Member of [`Channel::OUTPUTS`]
    pub fn is_output(&self) -> bool {
        self.output_index().is_some()
    }

    /// Wire index for a read, or `InvalidChannel` when this is not an input
    pub fn require_input(&self) -> Result<u8, ProtocolError> {
        self.input_index().ok_or_else(|| {
            ProtocolError::InvalidChannel(format!(
                "{} is not an input channel (expected one of A2, A3, A4, A5, D2)",
                self
            ))
        })
    }

    /// Wire index for a write, or `InvalidChannel` when this is not an output
    pub fn require_output(&self) -> Result<u8, ProtocolError> {
        self.output_index().ok_or_else(|| {
            ProtocolError::InvalidChannel(format!(
                "{} is not an output channel (expected A0 or A1)",
                self
            ))
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A0" => Ok(Channel::A0),
            "A1" => Ok(Channel::A1),
            "A2" => Ok(Channel::A2),
            "A3" => Ok(Channel::A3),
            "A4" => Ok(Channel::A4),
            "A5" => Ok(Channel::A5),
            "D2" => Ok(Channel::D2),
            _ => Err(ProtocolError::InvalidChannel(format!(
                "unknown channel label '{}'",
                s
            ))),
        }
    }
}

/// Pins that can drive a PWM signal
pub const PWM_PINS: [u8; 7] = [5, 7, 9, 10, 11, 12, 13];

/// PWM pin wired out on the enhancement board
pub const DEFAULT_PWM_PIN: u8 = 9;

/// Validate a PWM pin number
pub fn require_pwm_pin(pin: u8) -> Result<u8, ProtocolError> {
    if PWM_PINS.contains(&pin) {
        Ok(pin)
    } else {
        Err(ProtocolError::InvalidChannel(format!(
            "D{} cannot output PWM (expected one of 5, 7, 9, 10-13)",
            pin
        )))
    }
}

/// Input range the firmware assumes for subsequent reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadMode {
    /// Inputs in [0, 3.3) V
    #[default]
    #[serde(rename = "DC")]
    Dc,
    /// Inputs in [-8, +8] V, requires the bipolar front-end board
    #[serde(rename = "AC")]
    Ac,
}

impl ReadMode {
    /// Index sent with `Mode`
    pub fn wire_index(&self) -> u8 {
        match self {
            ReadMode::Dc => 0,
            ReadMode::Ac => 1,
        }
    }

    /// Nominal input range `(min, max)` in volts
    pub fn input_range(&self) -> (f64, f64) {
        match self {
            ReadMode::Dc => (0.0, 3.3),
            ReadMode::Ac => (-8.0, 8.0),
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMode::Dc => f.write_str("DC"),
            ReadMode::Ac => f.write_str("AC"),
        }
    }
}

impl FromStr for ReadMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DC" => Ok(ReadMode::Dc),
            "AC" => Ok(ReadMode::Ac),
            _ => Err(ProtocolError::InvalidMode(format!(
                "'{}' (expected DC or AC)",
                s
            ))),
        }
    }
}
