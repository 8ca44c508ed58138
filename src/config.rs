//! Configuration loader and validator for the shelfshot client library.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub service: Service,
    pub upload: Upload,
    pub capture: Capture,
    pub pipeline: Pipeline,
}

/// Remote ingestion/catalog service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub base_url: String,
    pub api_key: String,
}

/// Chunked upload tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upload {
    /// Chunk threshold in bytes. A full chunk of exactly this size is sent
    /// per PUT; the final PUT may be smaller.
    pub chunk_size: usize,
    pub retry_attempts: u32,
    /// Backoff unit; attempt N waits N x this long before retrying.
    pub retry_backoff_ms: u64,
    /// Where the best-effort resume marker lives; empty disables it.
    #[serde(default)]
    pub data_dir: String,
}

/// Capture-side timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capture {
    /// Bounded wait for the device stream "ready" signal.
    pub device_ready_timeout_ms: u64,
    /// Encoder timeslice for streaming recordings.
    pub timeslice_ms: u64,
    /// Interval between side-channel frame extractions.
    pub frame_interval_ms: u64,
}

/// Pipeline tracker timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    /// Fallback poll cadence for stuck transcriptions.
    pub poll_interval_ms: u64,
    /// Wall-clock ceiling after which a `processing` notification is dismissed.
    pub dismiss_after_secs: u64,
}

impl Upload {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Capture {
    pub fn device_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.device_ready_timeout_ms)
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Pipeline {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dismiss_after(&self) -> Duration {
        Duration::from_secs(self.dismiss_after_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `shelfshot.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("shelfshot.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.service.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("service.base_url must be non-empty"));
    }
    if cfg.service.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("service.api_key must be non-empty"));
    }

    if cfg.upload.chunk_size == 0 {
        return Err(ConfigError::Invalid("upload.chunk_size must be > 0"));
    }
    if cfg.upload.retry_attempts == 0 {
        return Err(ConfigError::Invalid("upload.retry_attempts must be > 0"));
    }

    if cfg.capture.device_ready_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "capture.device_ready_timeout_ms must be > 0",
        ));
    }
    if cfg.capture.timeslice_ms == 0 {
        return Err(ConfigError::Invalid("capture.timeslice_ms must be > 0"));
    }
    if cfg.capture.frame_interval_ms == 0 {
        return Err(ConfigError::Invalid("capture.frame_interval_ms must be > 0"));
    }

    if cfg.pipeline.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("pipeline.poll_interval_ms must be > 0"));
    }
    if cfg.pipeline.dismiss_after_secs == 0 {
        return Err(ConfigError::Invalid(
            "pipeline.dismiss_after_secs must be > 0",
        ));
    }

    Ok(())
}

/// Returns a canonical example YAML document, also used by tests.
pub fn example() -> &'static str {
    r#"service:
  base_url: "https://ingest.example.com/"
  api_key: "YOUR_SERVICE_API_KEY"

upload:
  chunk_size: 8388608
  retry_attempts: 3
  retry_backoff_ms: 500
  data_dir: "./data"

capture:
  device_ready_timeout_ms: 5000
  timeslice_ms: 1000
  frame_interval_ms: 1000

pipeline:
  poll_interval_ms: 5000
  dismiss_after_secs: 180
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.upload.chunk_size, 8 * 1024 * 1024);
        assert_eq!(cfg.pipeline.dismiss_after(), Duration::from_secs(180));
    }

    #[test]
    fn invalid_service_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.service.base_url = "".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.service.api_key = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_upload_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.upload.chunk_size = 0;
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("chunk_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.upload.retry_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_timing_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.capture.device_ready_timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.pipeline.poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.pipeline.dismiss_after_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("shelfshot.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.upload.retry_attempts, 3);
    }
}
