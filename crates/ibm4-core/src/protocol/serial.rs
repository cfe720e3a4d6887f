//! Serial port handling
//!
//! Provides the `serialport`-backed transport and the platform listing of
//! candidate port names used during discovery.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::transport::{ReadTerminator, SerialSettings, Transport};
use super::ProtocolError;

/// Poll interval while waiting for response bytes
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Number of `COMn` names probed on Windows
const WINDOWS_COM_PORTS: usize = 256;

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then COM ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("COM") {
        if let Ok(num) = rest.parse::<usize>() {
            return (2, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// Matches the `/dev/tty[A-Za-z]*` pattern, which leaves out the controlling
/// terminal `/dev/tty` and the numbered virtual consoles
fn is_posix_tty(name: &str) -> bool {
    name.strip_prefix("tty")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_alphabetic())
}

/// Candidate port names for an OS family, given the entries of `/dev`
pub(crate) fn candidates_for(
    os: &str,
    dev_entries: impl IntoIterator<Item = String>,
) -> Result<Vec<String>, ProtocolError> {
    let mut ports: Vec<String> = match os {
        "windows" => (1..=WINDOWS_COM_PORTS).map(|i| format!("COM{}", i)).collect(),
        "linux" | "cygwin" => dev_entries
            .into_iter()
            .filter(|name| is_posix_tty(name))
            .map(|name| format!("/dev/{}", name))
            .collect(),
        "macos" => dev_entries
            .into_iter()
            .filter(|name| name.starts_with("tty."))
            .map(|name| format!("/dev/{}", name))
            .collect(),
        other => return Err(ProtocolError::UnsupportedPlatform(other.to_string())),
    };
    ports.sort_by_key(|p| port_sort_key(p));
    ports.dedup();
    Ok(ports)
}

/// List the serial ports that may host an IBM4, in probe order
pub fn list_ports() -> Result<Vec<String>, ProtocolError> {
    let os = std::env::consts::OS;
    let entries: Vec<String> = if os == "windows" {
        Vec::new()
    } else {
        std::fs::read_dir("/dev")
            .map(|dir| {
                dir.flatten()
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let ports = candidates_for(os, entries)?;
    debug!("list_ports: {} candidate port(s) on {}", ports.len(), os);
    Ok(ports)
}

/// `serialport`-backed transport, 8N1 with no flow control
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Open and configure `name`
    pub fn open(name: &str, settings: &SerialSettings) -> Result<Self, ProtocolError> {
        settings.validate()?;

        let mut port = serialport::new(name, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.write_timeout)
            .open()
            .map_err(|e| ProtocolError::open_failure(name, e))?;

        // CircuitPython only streams to the host once DTR is asserted
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!("open: failed to set DTR high on {}: {} (continuing)", name, e);
        }

        debug!(
            "open: {} at {} baud, read timeout {}ms, write timeout {}ms",
            name,
            settings.baud_rate,
            settings.read_timeout.as_millis(),
            settings.write_timeout.as_millis()
        );

        Ok(Self {
            name: name.to_string(),
            port: Some(port),
            read_timeout: settings.read_timeout,
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        // No flush(): on unix it calls tcdrain, which ignores the write timeout
        match self.port_mut()?.write_all(bytes) {
            Ok(()) => Ok(bytes.len()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(ProtocolError::WriteTimeout),
            Err(e) => Err(ProtocolError::SerialError(e.to_string())),
        }
    }

    fn read_until(&mut self, terminator: &ReadTerminator) -> Result<Vec<u8>, ProtocolError> {
        let timeout = self.read_timeout;
        let port = self.port_mut()?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 512];
        let start = Instant::now();

        // Stop once the response is complete and nothing more is queued
        loop {
            let available = port
                .bytes_to_read()
                .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

            if available == 0 {
                if terminator.is_complete(&response) {
                    break;
                }
                if start.elapsed() > timeout {
                    debug!(
                        "read_until: timeout after {}ms with {} byte(s)",
                        timeout.as_millis(),
                        response.len()
                    );
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let to_read = std::cmp::min(available as usize, buffer.len());
            match port.read(&mut buffer[..to_read]) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&buffer[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
            if start.elapsed() > timeout {
                break;
            }
        }

        Ok(response)
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        self.port_mut()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("close: released {}", self.name);
        }
    }
}
