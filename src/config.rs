use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Where the stats client listens
#[derive(Args, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Address of the machine running the stats client
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the local stats API
    #[arg(short('p'), long, default_value = "3490")]
    pub port: u16,
}

impl Default for Connection {
    fn default() -> Self {
        Connection {
            host: "127.0.0.1".to_string(),
            port: 3490,
        }
    }
}

impl Connection {
    /// Returns `http://host:port` or an error if the host is blank
    pub fn base_url(&self) -> Result<String> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(PulseError::Configuration("host must not be empty".to_string()));
        }
        Ok(format!("http://{}:{}", host, self.port))
    }
}

/// Converts a number of seconds given on the command line into a positive duration
fn positive_secs(name: &str, value: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(value) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(PulseError::Configuration(format!(
            "{} must be a positive number of seconds, got {}",
            name, value
        ))),
    }
}

#[derive(Args, Clone, Debug)]
pub struct MeterCommand {
    #[command(flatten)]
    pub connection: Connection,

    /// Stops the measurement after this many seconds.
    /// If not given, the measurement runs until interrupted with Ctrl-C
    #[arg(short('d'), long)]
    pub duration: Option<f64>,

    /// Meter sampling period, in seconds
    #[arg(short('s'), long, default_value = "0.2")]
    pub sampling_period: f64,

    /// Stats refresh period of the poller, in seconds
    #[arg(long, default_value = "1.0")]
    pub poll_period: f64,

    /// Timeout of a single stats request, in seconds
    #[arg(long, default_value = "5.0")]
    pub timeout: f64,

    /// Saves the JSON report under a generated file name in the current directory
    #[arg(long)]
    pub save: bool,

    /// Path to an output file where the JSON report should be written to.
    /// Implies `--save`
    #[arg(short('o'), long)]
    pub output: Option<PathBuf>,

    /// Don't print the per-second log
    #[arg(short('q'), long)]
    pub quiet: bool,
}

impl MeterCommand {
    pub fn duration(&self) -> Result<Option<Duration>> {
        self.duration.map(|d| positive_secs("duration", d)).transpose()
    }

    pub fn sampling_period(&self) -> Result<Duration> {
        positive_secs("sampling period", self.sampling_period)
    }

    pub fn poll_period(&self) -> Result<Duration> {
        positive_secs("poll period", self.poll_period)
    }

    pub fn timeout(&self) -> Result<Duration> {
        positive_secs("timeout", self.timeout)
    }
}

#[derive(Args, Clone, Debug)]
pub struct StatsCommand {
    #[command(flatten)]
    pub connection: Connection,

    /// Keeps refreshing the stats every second until interrupted
    #[arg(short('w'), long)]
    pub watch: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ShowCommand {
    /// Path to the JSON report written by a previous measurement
    pub report: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measures clicks per second
    Clicks(MeterCommand),
    /// Measures download and upload throughput
    Network(MeterCommand),
    /// Displays the current counters of the stats client
    Stats(StatsCommand),
    /// Asks the stats client to pulse its counters
    Pulse(Connection),
    /// Checks whether the stats client is reachable
    Ping(Connection),
    /// Displays a saved measurement report
    Show(ShowCommand),
}

#[derive(Parser, Debug)]
#[command(
    name = "pulsemeter",
    about = "Measures click rates and network throughput reported by a local stats API",
    version
)]
pub struct AppConfig {
    /// Enables debug logging
    #[arg(short('v'), long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}
