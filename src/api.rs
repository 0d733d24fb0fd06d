use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Connection;
use crate::error::{PulseError, Result};

/// Response of `GET /v1/all-stats`
#[derive(Debug, Deserialize)]
pub struct AllStatsResponse {
    pub unpulsed: Unpulsed,
    pub realtime: Realtime,
}

/// Counters accumulated since the last pulse
#[derive(Debug, Deserialize)]
pub struct Unpulsed {
    pub clicks: u64,
    pub download: u64,
    pub keys: u64,
    pub upload: u64,
    pub uptime: u64,
    pub scrolls: u64,
}

/// Rates as preformatted by the stats client, e.g. `"3,25"` or `"1.5 MB/s"`
#[derive(Debug, Deserialize)]
pub struct Realtime {
    pub clicks: String,
    pub keys: String,
    pub download: String,
    pub upload: String,
}

/// Decoded counters of the stats client.
/// Byte counters and speeds are in bytes and bytes per second.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub keys: u64,
    pub clicks: u64,
    pub scrolls: u64,
    pub download: u64,
    pub upload: u64,
    pub uptime: u64,
    pub kps: f64,
    pub cps: f64,
    pub download_speed: u64,
    pub upload_speed: u64,
}

impl StatsSnapshot {
    /// Fixed placeholder values shown while the stats client can't be reached
    pub fn demo() -> StatsSnapshot {
        StatsSnapshot {
            keys: 123_456,
            clicks: 98_765,
            scrolls: 321,
            download: 12_345_678_901,
            upload: 2_345_678_901,
            uptime: 987_654,
            kps: 4.2,
            cps: 5.1,
            download_speed: 0,
            upload_speed: 0,
        }
    }
}

impl From<AllStatsResponse> for StatsSnapshot {
    fn from(response: AllStatsResponse) -> Self {
        let unpulsed = response.unpulsed;
        let realtime = response.realtime;
        StatsSnapshot {
            keys: unpulsed.keys,
            clicks: unpulsed.clicks,
            scrolls: unpulsed.scrolls,
            download: unpulsed.download,
            upload: unpulsed.upload,
            uptime: unpulsed.uptime,
            kps: parse_decimal(&realtime.keys).unwrap_or(0.0),
            cps: parse_decimal(&realtime.clicks).unwrap_or(0.0),
            download_speed: parse_speed(&realtime.download),
            upload_speed: parse_speed(&realtime.upload),
        }
    }
}

/// Parses a decimal number written with either `.` or `,` as the decimal separator.
///
/// Accepted: optional surrounding whitespace, an optional leading sign, digits
/// and at most one separator, e.g. `"3"`, `"-0,5"`, `"12.75"`, `",5"`.
/// Thousands grouping, exponents and special values like `inf` are rejected.
pub fn parse_decimal(s: &str) -> Option<f64> {
    let s = s.trim();
    let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut digits = 0;
    let mut separators = 0;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' | ',' => separators += 1,
            _ => return None,
        }
    }
    if digits == 0 || separators > 1 {
        return None;
    }
    s.replace(',', ".").parse().ok()
}

/// Parses a speed like `"1,5 MB/s"` into bytes per second.
/// Multiples are binary (1 KB = 1024 B). Returns 0 for anything unrecognized.
pub fn parse_speed(s: &str) -> u64 {
    const UNITS: [(&str, f64); 4] = [
        ("GB/s", 1024.0 * 1024.0 * 1024.0),
        ("MB/s", 1024.0 * 1024.0),
        ("KB/s", 1024.0),
        ("B/s", 1.0),
    ];
    let s = s.trim();
    for &(suffix, multiplier) in UNITS.iter() {
        if let Some(number) = s.strip_suffix(suffix) {
            let value = parse_decimal(number).unwrap_or(0.0);
            // negative values saturate to 0
            return (value * multiplier) as u64;
        }
    }
    0
}

/// Talks to the local stats API
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(connection: &Connection, timeout: Duration) -> Result<ApiClient> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ApiClient {
            client,
            base_url: connection.base_url()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches all counters
    pub async fn all_stats(&self) -> Result<StatsSnapshot> {
        let url = format!("{}/v1/all-stats", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PulseError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        let decoded: AllStatsResponse = serde_json::from_str(&body)?;
        Ok(decoded.into())
    }

    /// Triggers a pulse. Returns the HTTP status the stats client responded with.
    pub async fn pulse(&self) -> Result<u16> {
        let url = format!("{}/v1/pulse", self.base_url);
        let response = self.client.post(&url).send().await?;
        let status = response.status().as_u16();
        debug!("Pulse response: {}", status);
        Ok(status)
    }

    /// Succeeds only if the stats client answers `GET /` with 200 OK
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/", self.base_url);
        let response = self.client.get(&url).send().await?;
        match response.status().as_u16() {
            200 => Ok(()),
            other => Err(PulseError::Status(other)),
        }
    }
}
