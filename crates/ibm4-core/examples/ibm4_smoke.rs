//! IBM4 Smoke Test Tool
//!
//! Opens a session, identifies the board, drives A0 and reads every input.
//!
//! Usage:
//!   cargo run --example ibm4_smoke -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: probe for the first IBM4)
//!   --sim             Use the in-process simulated board
//!   --config FILE     Load session settings from a JSON file
//!   --mode MODE       Read mode, DC or AC (default: DC)
//!   --samples N       Samples per averaged read (default: 10)
//!   --volts V         Voltage written to A0 (default: 1.5)
//!
//! Set RUST_LOG=ibm4_core=debug to see each exchange.

use anyhow::{bail, Context, Result};
use ibm4_core::prelude::*;
use ibm4_core::protocol::sim::SimulatedDevice;
use tracing_subscriber::EnvFilter;

struct Options {
    config: SessionConfig,
    sim: bool,
    samples: u32,
    volts: f64,
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = SessionConfig::default();
    let mut sim = false;
    let mut samples = 10u32;
    let mut volts = 1.5f64;
    let mut port = None;
    let mut mode = None;

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .cloned()
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--port" | "-p" => {
                port = Some(value(i)?);
                i += 1;
            }
            "--config" | "-c" => {
                config = SessionConfig::from_file(value(i)?)?;
                i += 1;
            }
            "--mode" | "-m" => {
                mode = Some(value(i)?.parse::<ReadMode>()?);
                i += 1;
            }
            "--samples" | "-n" => {
                samples = value(i)?.parse().context("--samples expects an integer")?;
                i += 1;
            }
            "--volts" | "-v" => {
                volts = value(i)?.parse().context("--volts expects a number")?;
                i += 1;
            }
            "--sim" => sim = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            arg if !arg.starts_with('-') => port = Some(arg.to_string()),
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    if port.is_some() {
        config.port_name = port;
    }
    if let Some(mode) = mode {
        config.read_mode = mode;
    }
    config.validate()?;

    Ok(Some(Options {
        config,
        sim,
        samples,
        volts,
    }))
}

fn print_help() {
    println!("IBM4 Smoke Test Tool");
    println!();
    println!("Usage: ibm4_smoke [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port PORT     Serial port (default: probe for the first IBM4)");
    println!("  --sim           Use the in-process simulated board");
    println!("  --config FILE   Load session settings from a JSON file");
    println!("  --mode MODE     Read mode, DC or AC (default: DC)");
    println!("  --samples N     Samples per averaged read (default: 10)");
    println!("  --volts V       Voltage written to A0 (default: 1.5)");
}

fn exercise<T: Transport>(session: &mut Session<T>, samples: u32, volts: f64) -> Result<()> {
    let idn = session.identify().context("identification failed")?;
    println!("✓ Connected to {} on {}", idn.trim(), session.port_name());

    session.write_voltage(Channel::A0, volts)?;
    println!("✓ A0 set to {:.2} V", volts);

    let readings = session.read_all_channels(samples)?;
    println!();
    println!("Averaged inputs ({} samples, {} mode):", samples, session.config().read_mode);
    for (channel, value) in Channel::INPUTS.iter().zip(readings) {
        println!("  {}: {:>8.4} V", channel, value);
    }

    let spread = session.read_multiple(Channel::A2, samples)?;
    println!();
    println!("A2 spread: {:.4} ± {:.4} V", spread.mean, spread.half_range);

    session.zero_outputs()?;
    println!("✓ Outputs zeroed");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    if options.sim {
        let device = SimulatedDevice::new("sim0");
        let mut session = Session::with_transport(device, options.config)?;
        exercise(&mut session, options.samples, options.volts)
    } else {
        let mut session = Session::open(options.config).context("could not open an IBM4")?;
        exercise(&mut session, options.samples, options.volts)
    }
}
