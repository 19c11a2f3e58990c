//! Line PLC CLI
//!
//! A command-line interface (CLI) application for the production line PLC,
//! talking Modbus TCP.
//!
//! This tool allows users to:
//! - Write the four control values and read back the machine state in one transaction.
//! - Read gate, motor and temperature registers.
//! - Read the PLC real-time clock and the product identifier.
//! - Write a single control register.
//! - Run in a continuous daemon mode to poll the machine state and print it
//!   to the console.
//!
//! The CLI leverages the `lineplc_lib` crate for the register map and client operations.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use lineplc_lib::tokio_sync_safe_client::SafeClient;
use log::*;
use std::panic;

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

macro_rules! print_status {
    ($client:expr) => {
        let status = $client
            .read_status()
            .with_context(|| "Cannot read status registers")?;
        println!("Status: {}", status);
        for warning in &status.warnings {
            println!("  warning: {}", warning);
        }
    };
}

macro_rules! print_clock {
    ($client:expr) => {
        let clock = $client
            .read_clock()
            .with_context(|| "Cannot read PLC clock")?;
        println!("PLC clock: {}", clock);
    };
}

macro_rules! print_product_code {
    ($client:expr) => {
        let product_code = $client
            .read_product_code()
            .with_context(|| "Cannot read product identifier")?;
        println!("Product code: {}", product_code);
    };
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Line PLC CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Resolve connection settings
    let config = args.connection_config()?;
    info!("Using PLC at {} (unit {})", config.endpoint(), config.unit_id);
    let client = SafeClient::new(config);

    // 3. Execute the command
    match &args.command {
        commandline::CliCommands::Operate { values } => {
            info!("Executing: Transaction with control values {values:?}");
            let result = client.operate(values);
            print!("{result}");
            if let Some(err) = &result.fatal_error {
                return Err(anyhow::anyhow!("Transaction failed: {err}"));
            }
            if let Some(Err(err)) = &result.write {
                if !result.connected {
                    return Err(anyhow::anyhow!("Invalid control values: {err}"));
                }
            }
        }
        commandline::CliCommands::ReadStatus => {
            info!("Executing: Read Status");
            print_status!(client);
        }
        commandline::CliCommands::ReadClock => {
            info!("Executing: Read Clock");
            print_clock!(client);
        }
        commandline::CliCommands::ReadProductCode => {
            info!("Executing: Read Product Code");
            print_product_code!(client);
        }
        commandline::CliCommands::ReadAll => {
            info!("Executing: Read All Values");
            print_status!(client);
            print_clock!(client);
            print_product_code!(client);
        }
        commandline::CliCommands::SetControl { index, value } => {
            info!("Executing: Set Control Register {index} to {value}");
            client
                .write_control_value(*index, *value)
                .with_context(|| format!("Failed to set control register {index} to {value}"))?;
            println!("Control register {index} set to {value} successfully.");
        }
        commandline::CliCommands::Daemon { poll_interval } => {
            info!("Starting daemon mode: interval={poll_interval:?}");
            loop {
                debug!("Daemon: Reading PLC state for stdout...");
                // A failed poll is reported and retried on the next interval.
                match (
                    client.read_status(),
                    client.read_clock(),
                    client.read_product_code(),
                ) {
                    (Ok(status), Ok(clock), Ok(product_code)) => {
                        println!("{clock} product={product_code} {status}");
                    }
                    (status, clock, product_code) => {
                        for err in [status.err(), clock.err(), product_code.err()]
                            .into_iter()
                            .flatten()
                        {
                            warn!("Daemon: poll failed: {err}");
                        }
                    }
                }
                std::thread::sleep(*poll_interval);
            }
        }
    }

    Ok(())
}
