//! # IBM4 Core Library
//!
//! Host-side driver for the IBM4 analog interface board.
//!
//! This library provides:
//! - Port discovery by `*IDN` signature probing
//! - The line-oriented ASCII command protocol over a serial link
//! - Analog output, PWM and single-ended or differential input reads
//! - Linear voltage sweeps across the analog outputs
//! - An in-process simulated board for tests and tools
//!
//! ## Channels
//!
//! - Outputs: A0, A1 (0 V to 3.3 V)
//! - Inputs: A2, A3, A4, A5, D2
//! - PWM: D9 by default
//!
//! ## Example
//!
//! ```rust,ignore
//! use ibm4_core::prelude::*;
//!
//! // Probe for the first attached board
//! let mut session = Session::open(SessionConfig::default())?;
//!
//! session.write_voltage(Channel::A0, 1.5)?;
//! let volts = session.read_average(Channel::A2, 10)?;
//! println!("A2: {:.3} V", volts);
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod protocol;
pub mod sweep;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::protocol::{
        Channel, MultiReading, ProtocolError, ReadMode, Session, SessionState, Transport,
    };
    pub use crate::sweep::{LinearSweep, SweepPoint};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
