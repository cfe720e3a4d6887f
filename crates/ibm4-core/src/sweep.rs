//! Linear voltage sweep
//!
//! Steps one analog output from `start` towards `end` and records the
//! averaged voltage at every input after each step. A typical fixture is a
//! diode in series with a sense resistor driven from A0, with A2 and A3 on
//! either side of the resistor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::protocol::{Channel, ProtocolError, Session, Transport, DELTA_VMIN, VMAX, VMIN};

/// Default settle time between setting a voltage and reading the inputs
pub const DEFAULT_SETTLE_MS: u64 = 250;

/// One step of a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    /// Voltage written to the output
    pub set_voltage: f64,
    /// Averaged inputs in the order A2, A3, A4, A5, D2
    pub readings: [f64; 5],
    /// When the inputs were read
    pub timestamp: DateTime<Utc>,
}

/// Sweep parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSweep {
    /// Output channel being swept
    pub output: Channel,
    /// First set voltage
    pub start: f64,
    /// Exclusive upper bound of the set voltages
    pub end: f64,
    /// Number of steps spanning `start..=end`
    pub steps: u32,
    /// Samples averaged per input reading
    pub samples: u32,
    /// Delay between setting a voltage and reading, in milliseconds on the wire
    #[serde(with = "settle_millis")]
    pub settle: Duration,
}

mod settle_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl LinearSweep {
    /// Sweep with the default settle time
    pub fn new(output: Channel, start: f64, end: f64, steps: u32, samples: u32) -> Self {
        Self {
            output,
            start,
            end,
            steps,
            samples,
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
        }
    }

    /// Override the settle time
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Voltage increment, bounded below by the smallest dependable step
    pub fn step_size(&self) -> f64 {
        ((self.end - self.start) / (self.steps.saturating_sub(1).max(1)) as f64).max(DELTA_VMIN)
    }

    /// Set voltages in sweep order; `end` itself is never written
    pub fn voltages(&self) -> Vec<f64> {
        let step = self.step_size();
        // Tolerance keeps float error from adding a point a hair below `end`
        let limit = self.end - step * 1e-9;
        (0..)
            .map(|k| self.start + k as f64 * step)
            .take_while(|&v| v < limit)
            .collect()
    }

    /// Check the parameters against the device limits and the session's
    /// sample bounds
    pub fn validate(&self, min_samples: u32, max_samples: u32) -> Result<(), ProtocolError> {
        self.output.require_output()?;
        if !(self.start >= VMIN && self.start < self.end) {
            return Err(ProtocolError::OutOfRange {
                quantity: "sweep start",
                value: self.start,
                min: VMIN,
                max: self.end,
            });
        }
        if self.end >= VMAX {
            return Err(ProtocolError::OutOfRange {
                quantity: "sweep end",
                value: self.end,
                min: self.start,
                max: VMAX,
            });
        }
        if self.end - self.start <= DELTA_VMIN {
            return Err(ProtocolError::ConfigurationError(format!(
                "sweep span {:.3} V must exceed {} V",
                self.end - self.start,
                DELTA_VMIN
            )));
        }
        if self.steps <= 2 {
            return Err(ProtocolError::ConfigurationError(format!(
                "sweep needs more than 2 steps, got {}",
                self.steps
            )));
        }
        if self.samples < min_samples || self.samples > max_samples {
            return Err(ProtocolError::OutOfRange {
                quantity: "sweep samples",
                value: self.samples as f64,
                min: min_samples as f64,
                max: max_samples as f64 + 1.0,
            });
        }
        Ok(())
    }

    /// Run the sweep on `session`.
    ///
    /// The output is left at the last set voltage; closing the session zeroes
    /// it.
    pub fn run<T: Transport>(&self, session: &mut Session<T>) -> Result<Vec<SweepPoint>, ProtocolError> {
        if !session.comms_status() {
            return Err(ProtocolError::NotConnected);
        }
        let config = session.config();
        self.validate(config.min_samples, config.max_samples)?;

        info!(
            "sweep: {} from {:.2} V to {:.2} V in {:.3} V steps",
            self.output,
            self.start,
            self.end,
            self.step_size()
        );

        let voltages = self.voltages();
        let mut points = Vec::with_capacity(voltages.len());
        for set_voltage in voltages {
            session.write_voltage(self.output, set_voltage)?;
            if !self.settle.is_zero() {
                std::thread::sleep(self.settle);
            }
            let readings = session.read_all_channels(self.samples)?;
            debug!("sweep: {:.2} V -> {:?}", set_voltage, readings);
            points.push(SweepPoint {
                set_voltage,
                readings,
                timestamp: Utc::now(),
            });
        }

        info!("sweep: complete, {} points", points.len());
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::protocol::mock::MockTransport;
    use crate::protocol::sim::SimulatedDevice;
    use pretty_assertions::assert_eq;

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            identify_on_open: false,
            ..SessionConfig::default()
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "{} != {}",
            actual,
            expected
        );
    }

    #[test]
    fn test_voltages_exclude_end() {
        let sweep = LinearSweep::new(Channel::A1, 0.0, 3.0, 5, 5);
        let voltages = sweep.voltages();
        assert_eq!(voltages.len(), 4);
        for (v, expected) in voltages.iter().zip([0.0, 0.75, 1.5, 2.25]) {
            assert_close(*v, expected);
        }
    }

    #[test]
    fn test_step_is_bounded_below() {
        let sweep = LinearSweep::new(Channel::A0, 0.0, 0.05, 100, 5);
        assert_close(sweep.step_size(), DELTA_VMIN);
        assert_eq!(sweep.voltages().len(), 5);
    }

    #[test]
    fn test_validation() {
        let ok = LinearSweep::new(Channel::A0, 0.0, 3.0, 5, 5);
        assert!(ok.validate(3, 10_000).is_ok());

        let cases = [
            LinearSweep { output: Channel::A2, ..ok.clone() },
            LinearSweep { start: -0.1, ..ok.clone() },
            LinearSweep { start: 3.0, end: 2.0, ..ok.clone() },
            LinearSweep { end: 3.3, ..ok.clone() },
            LinearSweep { start: 1.0, end: 1.005, ..ok.clone() },
            LinearSweep { steps: 2, ..ok.clone() },
            LinearSweep { samples: 2, ..ok.clone() },
        ];
        for case in cases {
            assert!(case.validate(3, 10_000).is_err(), "{:?}", case);
        }
    }

    #[test]
    fn test_invalid_sweep_sends_nothing() {
        let mock = MockTransport::new("sim0");
        let log = mock.log();
        let mut session = Session::with_transport(mock, quiet_config()).unwrap();
        log.clear();

        let sweep = LinearSweep::new(Channel::A0, 0.0, 3.5, 5, 5);
        assert!(sweep.run(&mut session).is_err());
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_sweep_on_simulated_fixture() {
        let device = SimulatedDevice::new("sim0").noise(0.0);
        let mut session = Session::with_transport(device, SessionConfig::default()).unwrap();

        let sweep = LinearSweep::new(Channel::A0, 0.0, 2.0, 5, 5).settle(Duration::ZERO);
        let points = sweep.run(&mut session).unwrap();

        assert_eq!(points.len(), 4);
        for point in &points {
            // A2 follows A0, A4 sits behind the divider
            assert!((point.readings[0] - point.set_voltage).abs() < 1e-3);
            assert!((point.readings[2] - point.set_voltage / 2.0).abs() < 1e-3);
            assert_eq!(point.readings[3], 0.0);
        }
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_sweep_point_serializes() {
        let point = SweepPoint {
            set_voltage: 1.5,
            readings: [1.5, 0.0, 0.75, 0.0, 0.0],
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["set_voltage"], 1.5);
        assert_eq!(json["readings"].as_array().map(|a| a.len()), Some(5));
    }
}
