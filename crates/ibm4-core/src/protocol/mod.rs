//! Serial Protocol Communication
//!
//! Implements the line-oriented ASCII protocol spoken by the IBM4 firmware.
//!
//! Every exchange is strictly synchronous: one command line goes out, the
//! device echoes it and (for reads) follows with a payload line, and the input
//! buffer is reset before the next command is issued.

pub mod channel;
pub mod commands;
mod error;
pub mod locator;
pub mod mock;
pub mod response;
pub mod serial;
mod session;
pub mod sim;
pub mod transport;

pub use channel::{Channel, ReadMode};
pub use commands::{Command, ReadKind};
pub use error::ProtocolError;
pub use locator::{Locator, PortOpener};
pub use response::{decode_numeric_tokens, MultiReading};
pub use serial::{list_ports, SerialTransport};
pub use session::{Session, SessionState};
pub use transport::{ReadTerminator, SerialSettings, Transport};

/// Default baud rate of the IBM4 USB CDC link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default timeout for reading a response, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 3000;

/// Default timeout for writing a command, in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 500;

/// Default per-port timeout while probing for a device, in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 50;

/// Substring that every IBM4 identification response contains
/// (e.g. `ISBY-UCC-RevA.1`)
pub const DEVICE_SIGNATURE: &str = "ISBY";

/// Lowest voltage the analog outputs accept (inclusive)
pub const VMIN: f64 = 0.0;

/// Highest voltage the analog outputs accept (exclusive)
pub const VMAX: f64 = 3.3;

/// Smallest dependable output voltage increment (10 mV)
pub const DELTA_VMIN: f64 = 0.01;

/// Line terminator appended to every command
pub const LINE_ENDING: &str = "\r\n";
