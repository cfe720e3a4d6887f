//! Simulated IBM4
//!
//! Interprets the wire protocol in-process so sessions, sweeps and tools can
//! run without hardware. The inputs are wired as a loop-back fixture:
//!
//! | Input | Source                |
//! |-------|-----------------------|
//! | A2    | A0                    |
//! | A3    | A1                    |
//! | A4    | A0 through a 1:2 divider |
//! | A5    | ground                |
//! | D2    | ground                |
//!
//! Every reading carries uniform noise of `±noise` volts from a seeded RNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::channel::ReadMode;
use super::transport::{ReadTerminator, Transport};
use super::{ProtocolError, VMAX};

/// Full-scale count of a binary read
const ADC_FULL_SCALE: f64 = 65535.0;

const DEFAULT_SEED: u64 = 0x1B44;

/// In-process stand-in for the board
pub struct SimulatedDevice {
    name: String,
    open: bool,
    signature: String,
    outputs: [f64; 2],
    pwm: Vec<(u8, u32)>,
    mode: ReadMode,
    noise: f64,
    rng: StdRng,
    pending_input: Vec<u8>,
    output: Vec<u8>,
}

impl SimulatedDevice {
    /// Board on `name` with the default seed
    pub fn new(name: &str) -> Self {
        Self::with_seed(name, DEFAULT_SEED)
    }

    /// Board on `name` whose noise sequence is fixed by `seed`
    pub fn with_seed(name: &str, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            open: true,
            signature: "ISBY-UCC-RevA.1".to_string(),
            outputs: [0.0; 2],
            pwm: Vec::new(),
            mode: ReadMode::Dc,
            noise: 0.002,
            rng: StdRng::seed_from_u64(seed),
            pending_input: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Peak noise amplitude in volts
    pub fn noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Identification line returned for `*IDN`
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Current analog output voltages (A0, A1)
    pub fn outputs(&self) -> [f64; 2] {
        self.outputs
    }

    /// Last duty written to `pin`
    pub fn pwm_duty(&self, pin: u8) -> Option<u32> {
        self.pwm.iter().find(|(p, _)| *p == pin).map(|(_, d)| *d)
    }

    /// Mode index last selected (0 = DC, 1 = AC)
    pub fn mode_index(&self) -> u8 {
        self.mode.wire_index()
    }

    fn input_voltage(&mut self, index: u8) -> Option<f64> {
        let clean = match index {
            0 => self.outputs[0],
            1 => self.outputs[1],
            2 => self.outputs[0] * 0.5,
            3 | 4 => 0.0,
            _ => return None,
        };
        let jitter = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        let (lo, hi) = self.mode.input_range();
        Some((clean + jitter).clamp(lo, hi))
    }

    fn to_counts(volts: f64) -> i64 {
        ((volts / VMAX).clamp(0.0, 1.0) * ADC_FULL_SCALE).round() as i64
    }

    fn sample(&mut self, indices: &[u8]) -> Option<f64> {
        match indices {
            [single] => self.input_voltage(*single),
            [pos, neg] => {
                let p = self.input_voltage(*pos)?;
                let n = self.input_voltage(*neg)?;
                Some(p - n)
            }
            _ => None,
        }
    }

    /// Payload for a read verb, `None` when the arguments are invalid
    fn read_payload(&mut self, args: &str, channels: usize, verb: &str) -> Option<String> {
        let fields: Vec<u32> = args
            .split(':')
            .map(|f| f.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .ok()?;
        if fields.len() != channels + 1 {
            return None;
        }
        let indices: Vec<u8> = fields[..channels].iter().map(|&i| i as u8).collect();
        let samples = fields[channels].max(1);

        match verb {
            "Average" => {
                let mut sum = 0.0;
                for _ in 0..samples {
                    sum += self.sample(&indices)?;
                }
                Some(format!("{:.4}", sum / samples as f64))
            }
            "BRead" => {
                let mut parts = Vec::with_capacity(samples as usize);
                for _ in 0..samples {
                    let v = self.sample(&indices)?;
                    parts.push(Self::to_counts(v.abs()).to_string());
                }
                Some(parts.join(" "))
            }
            _ => {
                let mut parts = Vec::with_capacity(samples as usize);
                for _ in 0..samples {
                    parts.push(format!("{:.4}", self.sample(&indices)?));
                }
                Some(parts.join(" "))
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        debug!("sim: handling {:?}", line);
        self.output.extend_from_slice(line.as_bytes());
        self.output.extend_from_slice(b"\r\n");

        let payload = if line == "*IDN" {
            Some(self.signature.clone())
        } else if let Some(rest) = line.strip_prefix("Diff_Average") {
            self.read_payload(rest, 2, "Average")
        } else if let Some(rest) = line.strip_prefix("Diff_BRead") {
            self.read_payload(rest, 2, "BRead")
        } else if let Some(rest) = line.strip_prefix("Diff_Read") {
            self.read_payload(rest, 2, "Read")
        } else if let Some(rest) = line.strip_prefix("Average") {
            self.read_payload(rest, 1, "Average")
        } else if let Some(rest) = line.strip_prefix("BRead") {
            self.read_payload(rest, 1, "BRead")
        } else if let Some(rest) = line.strip_prefix("Read") {
            self.read_payload(rest, 1, "Read")
        } else {
            self.apply_setting(line);
            None
        };

        if let Some(payload) = payload {
            self.output.extend_from_slice(payload.as_bytes());
            self.output.extend_from_slice(b"\r\n");
        }
    }

    fn apply_setting(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("Write") {
            if let Some((idx, volts)) = rest.split_once(':') {
                if let (Ok(idx), Ok(volts)) = (idx.parse::<usize>(), volts.parse::<f64>()) {
                    if let Some(slot) = self.outputs.get_mut(idx) {
                        *slot = volts;
                    }
                }
            }
        } else if let Some(rest) = line.strip_prefix("PWM") {
            if let Some((pin, duty)) = rest.split_once(':') {
                if let (Ok(pin), Ok(duty)) = (pin.parse::<u8>(), duty.parse::<u32>()) {
                    self.pwm.retain(|(p, _)| *p != pin);
                    self.pwm.push((pin, duty));
                }
            }
        } else if let Some(rest) = line.strip_prefix("Mode") {
            match rest {
                "0" => self.mode = ReadMode::Dc,
                "1" => self.mode = ReadMode::Ac,
                _ => debug!("sim: ignoring unknown mode {:?}", rest),
            }
        }
    }
}

impl Transport for SimulatedDevice {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.pending_input.extend_from_slice(bytes);
        while let Some(pos) = self.pending_input.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending_input.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line));
        }
        Ok(bytes.len())
    }

    fn read_until(&mut self, terminator: &ReadTerminator) -> Result<Vec<u8>, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        let mut end = self.output.len();
        for i in 1..=self.output.len() {
            if terminator.is_complete(&self.output[..i]) {
                end = i;
                break;
            }
        }
        Ok(self.output.drain(..end).collect())
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::NotConnected);
        }
        self.output.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}
