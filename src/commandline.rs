use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use lineplc_lib::{protocol as proto, tokio_common::ConnectionConfig};
use log::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn parse_unit_id(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid unit id format: {e}"))
}

fn parse_control_index(s: &str) -> Result<usize, String> {
    let index = s
        .parse::<usize>()
        .map_err(|e| format!("Invalid control register index: {e}"))?;
    proto::ControlValues::register_address(index).map_err(|e| e.to_string())?;
    Ok(index)
}

fn parse_register_value(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register value format: {e}"))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Write four control values and read back status, clock and product id.
    /// Each step is reported on its own, so a failed write does not hide the readings.
    #[clap(verbatim_doc_comment)]
    Operate {
        /// The control values written to registers 70 to 73.
        /// Values outside of 0..=65535 are rejected before connecting.
        #[arg(num_args = 1.., allow_negative_numbers = true, verbatim_doc_comment)]
        values: Vec<i64>,
    },

    /// Read and display gate, motor and temperature registers.
    ReadStatus,

    /// Read and display the PLC real-time clock.
    ReadClock,

    /// Read and display the product identifier.
    ReadProductCode,

    /// Read and display status, clock and product identifier.
    ReadAll,

    /// Write a single control register.
    SetControl {
        /// Index of the control register (0 to 3).
        #[arg(value_parser = parse_control_index)]
        index: usize,
        /// The value to write, decimal or hexadecimal (e.g. "0x10").
        #[arg(value_parser = parse_register_value)]
        value: u16,
    },

    /// Run in daemon mode: continuously read status, clock and product id and
    /// print them to the console. Nothing is written to the PLC.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval for polling the PLC (e.g., "10s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "2sec", verbatim_doc_comment)]
        poll_interval: Duration,
    },
}

const fn about_text() -> &'static str {
    "Line PLC CLI - Write control values to the production line PLC and read back its state via Modbus TCP."
}

#[derive(Parser, Debug)]
#[command(name="lineplc", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// YAML file with `host`, `port`, `unit_id` and `timeout` of the PLC.
    /// Command line options take precedence over the file.
    #[arg(global = true, short, long, verbatim_doc_comment)]
    pub config: Option<PathBuf>,

    /// Hostname or IP address of the PLC.
    #[arg(global = true, long)]
    pub host: Option<String>,

    /// Modbus TCP port of the PLC.
    #[arg(global = true, long)]
    pub port: Option<u16>,

    /// Modbus unit id of the PLC, decimal or hexadecimal.
    #[arg(global = true, short, long, value_parser = parse_unit_id)]
    pub unit_id: Option<u8>,

    /// Timeout for connecting and for each Modbus request.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    /// The connection settings: defaults, overlaid by the config file, overlaid by options.
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ConnectionConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(unit_id) = self.unit_id {
            config.unit_id = unit_id;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<ConnectionConfig> {
    debug!("Loading config file from {path:?}");
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open config file {}", path.display()))?;
    parse_config(file).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse_config(reader: impl std::io::Read) -> Result<ConnectionConfig> {
    Ok(serde_yaml::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_operate() {
        let args =
            CliArgs::try_parse_from(["lineplc", "--host", "10.0.0.2", "operate", "1", "2", "3", "4"])
                .unwrap();
        assert_eq!(
            args.command,
            CliCommands::Operate {
                values: vec![1, 2, 3, 4]
            }
        );
        let config = args.connection_config().unwrap();
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 502);
    }

    #[test]
    fn parse_set_control() {
        let args = CliArgs::try_parse_from(["lineplc", "set-control", "3", "0x10", "-u", "0x02"])
            .unwrap();
        assert_eq!(args.command, CliCommands::SetControl { index: 3, value: 16 });
        assert_eq!(args.connection_config().unwrap().unit_id, 2);

        assert!(CliArgs::try_parse_from(["lineplc", "set-control", "4", "1"]).is_err());
    }

    #[test]
    fn yaml_config() {
        let yaml = "host: plc.local\ntimeout: 250ms\n";
        let config = parse_config(yaml.as_bytes()).unwrap();
        assert_eq!(config.host, "plc.local");
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }
}
