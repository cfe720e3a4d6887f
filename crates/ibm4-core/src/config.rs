//! Session configuration
//!
//! Loaded from JSON or built in code. Every field has a default, so a config
//! file only needs the values it overrides:
//!
//! ```json
//! { "port_name": "/dev/ttyACM0", "read_mode": "AC", "max_samples": 103 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ProtocolError, ReadMode, SerialSettings, DEFAULT_BAUD_RATE, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS, DEVICE_SIGNATURE,
};

/// Connection and measurement settings for a [`Session`](crate::protocol::Session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Serial port name; `None` probes for the first attached IBM4
    pub port_name: Option<String>,
    /// Line speed
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Command write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Per-port probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Read mode selected at open
    pub read_mode: ReadMode,
    /// Run the `*IDN` handshake at open
    pub identify_on_open: bool,
    /// The firmware echoes every command line before its payload
    pub echo_commands: bool,
    /// Smallest sample count accepted for averaged and multi-sample reads
    pub min_samples: u32,
    /// Largest sample count accepted; the device times out somewhere above
    /// this, so tune it against real hardware
    pub max_samples: u32,
    /// Substring the identification line must contain
    pub device_signature: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            read_mode: ReadMode::Dc,
            identify_on_open: true,
            echo_commands: true,
            min_samples: 3,
            max_samples: 10_000,
            device_signature: DEVICE_SIGNATURE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Config bound to a named port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: Some(port_name.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProtocolError::ConfigurationError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Pretty-printed JSON form, loadable by [`SessionConfig::from_json_str`]
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigurationError(e.to_string()))
    }

    /// Check every field, failing with [`ProtocolError::ConfigurationError`]
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.serial_settings().validate()?;
        if self.probe_timeout_ms == 0 {
            return Err(ProtocolError::ConfigurationError(
                "probe timeout must be non-zero".to_string(),
            ));
        }
        if self.min_samples == 0 || self.min_samples > self.max_samples {
            return Err(ProtocolError::ConfigurationError(format!(
                "sample limits must satisfy 1 <= min ({}) <= max ({})",
                self.min_samples, self.max_samples
            )));
        }
        if self.device_signature.is_empty() {
            return Err(ProtocolError::ConfigurationError(
                "device signature must not be empty".to_string(),
            ));
        }
        if matches!(&self.port_name, Some(name) if name.trim().is_empty()) {
            return Err(ProtocolError::ConfigurationError(
                "port name must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Transport settings for the session port
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    /// Per-port timeout used while locating the device
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.read_timeout_ms, 3000);
        assert_eq!(config.write_timeout_ms, 500);
        assert_eq!(config.read_mode, ReadMode::Dc);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config =
            SessionConfig::from_json_str(r#"{ "port_name": "COM3", "read_mode": "AC" }"#).unwrap();
        assert_eq!(config.port_name.as_deref(), Some("COM3"));
        assert_eq!(config.read_mode, ReadMode::Ac);
        assert_eq!(config.max_samples, 10_000);
    }

    #[test]
    fn test_negative_timeout_rejected() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{ "read_timeout_ms": -5 }"#),
            Err(ProtocolError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        assert!(SessionConfig::from_json_str(r#"{ "min_samples": 50, "max_samples": 10 }"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{ "baud_rate": 0 }"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{ "read_mode": "RMS" }"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{ "port": "COM3" }"#).is_err());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ibm4.json");
        let config = SessionConfig {
            max_samples: 103,
            ..SessionConfig::for_port("/dev/ttyACM0")
        };
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        assert_eq!(SessionConfig::from_file(&path).unwrap(), config);
    }
}
