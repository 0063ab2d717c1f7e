use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ss_transport::DEFAULT_MAX_FRAME_LEN;

use crate::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding one `series_YYYY-MM-DD.dat` file per day.
    pub data_dir: PathBuf,
    /// Number of day series kept in memory.
    pub cache_size: usize,
    pub port: u16,
    pub max_frame_len: u32,
    /// Client-side bound on each request; `None` waits forever.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/timeseries"),
            cache_size: 7,
            port: 12345,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            request_timeout_ms: None,
        }
    }
}

impl ServiceConfig {
    /// Reads a JSON file; keys that are missing keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)
            .map_err(|err| ServiceError::Config(format!("{}: {err}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(ServiceError::Config("cache_size must be at least 1".into()));
        }
        if self.max_frame_len == 0 {
            return Err(ServiceError::Config("max_frame_len must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
