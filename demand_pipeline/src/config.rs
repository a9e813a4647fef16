use crate::error::{IngestError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEZONE: &str = "America/Mexico_City";
pub const DEFAULT_ENDPOINT: &str =
    "https://www.cenace.gob.mx/GraficaDemanda.aspx/obtieneValoresTotal";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// IANA timezone every table is expressed in.
    pub timezone: String,
    pub cache_dir: PathBuf,
    pub clean_dir: PathBuf,
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Bytes inspected when choosing between `;` and `,`.
    pub delimiter_sample_bytes: usize,
    /// Lines scanned for the header row before giving up.
    pub header_scan_lines: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            cache_dir: PathBuf::from("data_cache"),
            clean_dir: PathBuf::from("data_clean").join("demand"),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
            delimiter_sample_bytes: 3000,
            header_scan_lines: 200,
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config file; keys left out keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.tz()?;
        Ok(config)
    }

    pub fn tz(&self) -> Result<Tz> {
        Tz::from_str(&self.timezone)
            .map_err(|e| IngestError::Config(format!("timezone '{}': {}", self.timezone, e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
