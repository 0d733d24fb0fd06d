use core::fmt;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use console::style;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::api::StatsSnapshot;
use crate::config::Connection;
use crate::error::{PulseError, Result};
use crate::format::{format_bytes, format_number, format_rate, format_time, format_uptime};
use crate::meter::{ClickMeter, MeterSummary, NetworkMeter, RateMeter};

const REPORT_WIDTH: usize = 74;

/// Which meter produced a report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterKind {
    Clicks,
    Network,
}

impl Display for MeterKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MeterKind::Clicks => write!(f, "clicks"),
            MeterKind::Network => write!(f, "network"),
        }
    }
}

/// Keeps all data we want to save about a finished measurement
#[derive(Debug, Serialize, Deserialize)]
pub struct Report {
    pub created: DateTime<Local>,
    pub kind: MeterKind,
    pub connection: Connection,
    pub summary: MeterSummary,
}

impl Report {
    pub fn new(kind: MeterKind, connection: Connection, summary: MeterSummary) -> Report {
        Report {
            created: Local::now(),
            kind,
            connection,
            summary,
        }
    }

    /// Loads a report from a JSON file
    pub fn load(path: &Path) -> Result<Report> {
        let file =
            fs::File::open(path).map_err(|e| PulseError::ReportRead(path.to_path_buf(), e))?;
        serde_json::from_reader(file)
            .map_err(|e| PulseError::ReportDecode(path.to_path_buf(), e))
    }

    /// Saves the report to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let f =
            fs::File::create(path).map_err(|e| PulseError::ReportWrite(path.to_path_buf(), e))?;
        serde_json::to_writer_pretty(f, &self)?;
        Ok(())
    }
}

/// Constructs the report file name from the meter kind, the host and the current time
pub fn default_output_name(kind: MeterKind, connection: &Connection) -> PathBuf {
    let host = connection.host.trim().replace([':', '/'], "_");
    let components = [
        kind.to_string(),
        host,
        format!("p{}", connection.port),
        Local::now().format("%Y%m%d.%H%M%S").to_string(),
    ];
    PathBuf::from(format!("{}.json", components.join(".")))
}

/// Share text of a finished click measurement
pub fn click_report_text(meter: &ClickMeter) -> String {
    let clicks = meter.clicks_channel();
    format!(
        "Report: Clicks per second\nPeak: {:.2} | Avg: {:.2} | Duration: {}s | Total Clicks: {}",
        clicks.peak(),
        clicks.average(),
        meter.elapsed_secs(),
        clicks.total()
    )
}

fn megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1_000_000.0)
}

/// Share text of a finished network measurement
pub fn network_report_text(meter: &NetworkMeter) -> String {
    let down = meter.download();
    let up = meter.upload();
    [
        "Report: Network".to_string(),
        format!("Download Peak: {:.2} | Avg: {:.2} Mbps", down.peak(), down.average()),
        format!("Upload Peak: {:.2} | Avg: {:.2} Mbps", up.peak(), up.average()),
        format!("Duration: {}s", meter.elapsed_secs()),
        format!("Downloaded: {}", megabytes(down.total())),
        format!("Uploaded: {}", megabytes(up.total())),
        format!("Total: {}", megabytes(down.total() + up.total())),
    ]
    .join("\n")
}

pub fn fmt_section_header(name: &str) -> String {
    format!(
        "{} {}",
        style(name).yellow().bold().bright().for_stdout(),
        style("═".repeat(REPORT_WIDTH - name.len() - 1))
            .yellow()
            .bold()
            .bright()
            .for_stdout()
    )
}

/// Prints the column headers of the per-second log
pub fn print_log_header<const N: usize>(meter: &RateMeter<N>) {
    let unit = meter.unit().symbol();
    let groups = meter
        .channels()
        .iter()
        .map(|c| format!("{:─^32}", format!(" {} [{}] ", c.name(), unit)))
        .join("  ");
    let columns = meter
        .channels()
        .iter()
        .map(|_| format!("{:>10} {:>10} {:>10}", "Current", "Peak", "Avg"))
        .join("  ");
    println!("{}", fmt_section_header("LOG"));
    println!("{}", style(format!("    Time  {}", groups)).yellow().bold().for_stdout());
    println!("{}", style(format!("     [s]  {}", columns)).yellow().for_stdout());
}

/// A single row of the per-second log
pub struct LogLine<'a, const N: usize>(pub &'a RateMeter<N>);

impl<const N: usize> Display for LogLine<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:8}", self.0.elapsed_secs())?;
        for channel in self.0.channels() {
            write!(
                f,
                "  {:10.2} {:10.2} {:10.2}",
                channel.current(),
                channel.peak(),
                channel.average()
            )?;
        }
        Ok(())
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", fmt_section_header("REPORT"))?;
        writeln!(f, "{:>16}: {}", "Created", self.created.format("%a, %d %b %Y %H:%M:%S"))?;
        writeln!(f, "{:>16}: {}", "Meter", self.kind)?;
        writeln!(
            f,
            "{:>16}: {}:{}",
            "Stats API", self.connection.host, self.connection.port
        )?;
        writeln!(f)?;
        write!(f, "{}", self.summary)
    }
}

/// Formats the counters of the stats client
impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let uptime = format_uptime(self.uptime);
        writeln!(f, "{}", fmt_section_header("STATS"))?;
        writeln!(f, "{:>16}: {:>16}", "Keys", format_number(self.keys))?;
        writeln!(f, "{:>16}: {:>16}", "Clicks", format_number(self.clicks))?;
        writeln!(f, "{:>16}: {:>16}", "Scrolls", format_number(self.scrolls))?;
        writeln!(f, "{:>16}: {:>16}", "Downloaded", format_bytes(self.download))?;
        writeln!(f, "{:>16}: {:>16}", "Uploaded", format_bytes(self.upload))?;
        writeln!(
            f,
            "{:>16}: {:>16}",
            "Uptime",
            if uptime.is_empty() { "< 1m" } else { &uptime }
        )?;
        writeln!(f, "{:>16}: {:>16}", "Keys/s", format_rate(self.kps))?;
        writeln!(f, "{:>16}: {:>16}", "Clicks/s", format_rate(self.cps))?;
        writeln!(
            f,
            "{:>16}: {:>14}/s",
            "Download speed",
            format_bytes(self.download_speed)
        )?;
        writeln!(
            f,
            "{:>16}: {:>14}/s",
            "Upload speed",
            format_bytes(self.upload_speed)
        )
    }
}

/// Formats the final aggregates of a meter
impl Display for MeterSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", fmt_section_header("SUMMARY"))?;
        writeln!(
            f,
            "{:>16}: {} ({})",
            "Duration",
            format_time(self.elapsed_secs),
            self.phase
        )?;
        let unit = self.unit.symbol();
        for c in &self.channels {
            writeln!(f, "{}", style(&c.name).white().bright().bold().for_stdout())?;
            writeln!(f, "{:>16}: {:10.2} {}", "Peak", c.peak, unit)?;
            writeln!(f, "{:>16}: {:10.2} {}", "Average", c.average, unit)?;
            match c.std_dev {
                Some(s) => writeln!(f, "{:>16}: {:10.2} {}", "Std. dev.", s, unit)?,
                None => writeln!(f, "{:>16}: {:>10}", "Std. dev.", "-")?,
            }
            writeln!(f, "{:>16}: {:10}", "Samples", c.sample_count)?;
            writeln!(f, "{:>16}: {:10}", "Total", c.total)?;
        }
        Ok(())
    }
}
