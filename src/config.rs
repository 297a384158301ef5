//! Fetcher configuration.
//!
//! Every timing constant the fetcher uses lives here so it can be tuned from
//! a TOML file or the command line instead of being baked into the code.

use crate::error::DownloaderError;
use log::{info, warn};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetcherConfig {
    /// Per-request timeout for page fetches and HEAD checks, in seconds.
    pub timeout_secs: u64,
    /// Per-request timeout for streamed file downloads, in seconds.
    pub download_timeout_secs: u64,
    /// Seconds to wait between files of the same page.
    pub delay_between_files: f64,
    /// Seconds to wait between pages.
    pub delay_between_urls: f64,
    /// Seconds to wait between a passing HEAD check and the GET.
    pub pre_download_delay: f64,
    /// Minimum gap between any two outbound requests, in seconds. 0 disables.
    pub min_request_interval: f64,
    /// Attempts beyond the first.
    pub max_retries: u32,
    /// Base backoff, in seconds.
    pub retry_delay: f64,
    pub backoff_multiplier: f64,
    /// Upper bound for a single backoff wait, in seconds.
    pub max_backoff: f64,
    pub jitter_min: f64,
    pub jitter_max: f64,
    /// Smallest byte count accepted as a real spreadsheet.
    pub min_file_size: u64,
    /// Download bandwidth cap in bytes per second.
    pub max_bytes_per_sec: Option<u64>,
    pub honor_retry_after: bool,
    pub user_agent: String,
    /// Site origin used to resolve relative links. Derived from the page URL when unset.
    pub base_url: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            download_timeout_secs: 120,
            delay_between_files: 2.0,
            delay_between_urls: 3.0,
            pre_download_delay: 1.0,
            min_request_interval: 0.0,
            max_retries: 3,
            retry_delay: 2.0,
            backoff_multiplier: 2.0,
            max_backoff: 300.0,
            jitter_min: 0.8,
            jitter_max: 1.2,
            min_file_size: 1000,
            max_bytes_per_sec: None,
            honor_retry_after: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            base_url: None,
        }
    }
}

impl FetcherConfig {
    pub fn load(path: &Path) -> Result<Self, DownloaderError> {
        let contents = std::fs::read_to_string(path)?;
        let config: FetcherConfig = toml::from_str(&contents)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config from {}: {}", path.display(), e);
                warn!("Using default configuration");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), DownloaderError> {
        let delays = [
            ("delay_between_files", self.delay_between_files),
            ("delay_between_urls", self.delay_between_urls),
            ("pre_download_delay", self.pre_download_delay),
            ("min_request_interval", self.min_request_interval),
            ("retry_delay", self.retry_delay),
            ("max_backoff", self.max_backoff),
        ];
        for (name, value) in delays {
            if !value.is_finite() || value < 0.0 {
                return Err(DownloaderError::ConfigError(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if !(self.backoff_multiplier > 0.0) {
            return Err(DownloaderError::ConfigError(format!(
                "backoff_multiplier must be positive, got {}",
                self.backoff_multiplier
            )));
        }
        if !(self.jitter_min > 0.0) || self.jitter_min > self.jitter_max {
            return Err(DownloaderError::ConfigError(format!(
                "jitter range [{}, {}) is invalid",
                self.jitter_min, self.jitter_max
            )));
        }
        if self.max_bytes_per_sec == Some(0) {
            return Err(DownloaderError::ConfigError(
                "max_bytes_per_sec must be positive when set".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(DownloaderError::ConfigError(
                "timeouts must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// A random factor in `[jitter_min, jitter_max)`.
    pub fn jitter(&self) -> f64 {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        rand::thread_rng().gen_range(self.jitter_min..self.jitter_max)
    }

    /// `seconds` scaled by a fresh jitter factor. Zero stays zero.
    pub fn jittered(&self, seconds: f64) -> Duration {
        if seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(seconds * self.jitter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FetcherConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.min_file_size, 1000);
        assert_eq!(config.jitter_min, 0.8);
        assert_eq!(config.jitter_max, 1.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: FetcherConfig = toml::from_str(
            r#"
            max_retries = 5
            delay_between_urls = 10.0
            base_url = "https://www.ons.gov.uk"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.delay_between_urls, 10.0);
        assert_eq!(config.base_url.as_deref(), Some("https://www.ons.gov.uk"));
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn rejects_inverted_jitter_range() {
        let config = FetcherConfig {
            jitter_min: 1.5,
            jitter_max: 1.0,
            ..FetcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DownloaderError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_negative_delay() {
        let config = FetcherConfig {
            delay_between_files: -1.0,
            ..FetcherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn jitter_stays_in_range() {
        let config = FetcherConfig::default();
        for _ in 0..1000 {
            let j = config.jitter();
            assert!((0.8..1.2).contains(&j), "jitter {} out of range", j);
        }
    }

    #[test]
    fn zero_delay_is_not_jittered() {
        let config = FetcherConfig::default();
        assert_eq!(config.jittered(0.0), Duration::ZERO);
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = FetcherConfig::load_or_default(&dir.path().join("missing.toml"));
        assert_eq!(config, FetcherConfig::default());
    }
}
