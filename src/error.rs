use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PulseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Stats response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to write report {0:?}: {1}")]
    ReportWrite(PathBuf, #[source] std::io::Error),

    #[error("Failed to read report {0:?}: {1}")]
    ReportRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse report {0:?}: {1}")]
    ReportDecode(PathBuf, #[source] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, PulseError>;
