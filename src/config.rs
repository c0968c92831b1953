use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Runtime configuration, read from the environment (after `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Serve fixtures instead of calling the detection backend.
    pub use_mock_data: bool,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let data_dir = finflagger_data_dir();
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            use_mock_data: true,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            export_dir: data_dir.join("exports"),
            data_dir,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparseable values keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let data_dir = lookup("FINFLAGGER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let export_dir = lookup("FINFLAGGER_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("exports"));

        Self {
            base_url: lookup("FINFLAGGER_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or(defaults.base_url),
            timeout: parsed("FINFLAGGER_API_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            use_mock_data: lookup("FINFLAGGER_USE_MOCK_DATA")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.use_mock_data),
            retry: RetryPolicy {
                max_retries: lookup("FINFLAGGER_MAX_RETRIES")
                    .and_then(|v| u32::from_str(v.trim()).ok())
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: parsed("FINFLAGGER_RETRY_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
            },
            poll_interval: parsed("FINFLAGGER_POLL_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            data_dir,
            export_dir,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("state").join("finflagger.sqlite")
    }
}

pub fn finflagger_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(env::temp_dir)
        .join(".finflagger")
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
