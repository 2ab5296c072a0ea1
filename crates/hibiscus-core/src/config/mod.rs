//! Configuration loading and validation.

mod types;

pub use types::{
    ApiConfig, DefaultsConfig, DownloadsConfig, GalleryConfig, ImageDefaults, JobsConfig,
    LoggingConfig, RetryConfig, VideoDefaults,
};

use crate::api::retry::{RetryOptions, SafetyRetryOptions};
use crate::error::ConfigError;
use crate::jobs::SchedulerOptions;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Complete Hibiscus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub jobs: JobsConfig,
    pub downloads: DownloadsConfig,
    pub gallery: GalleryConfig,
    pub defaults: DefaultsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading config");
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Platform config path, e.g. `~/.config/hibiscus/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "hibiscus", "hibiscus")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api.base_url must not be empty".into(),
            ));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.jobs.max_safety_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "jobs.max_safety_attempts must be at least 1".into(),
            ));
        }
        if !matches!(
            self.downloads.filename_format.as_str(),
            "prompt" | "timestamp" | "both"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "downloads.filename_format must be 'prompt', 'timestamp', or 'both', got '{}'",
                self.downloads.filename_format
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(format!("serialization failed: {e}")))
    }

    /// Download directory with `~` expanded.
    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.downloads.dir).into_owned())
    }

    /// Gallery directory with `~` expanded.
    pub fn gallery_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.gallery.dir).into_owned())
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_attempts: self.retry.max_attempts,
            backoff_ms: self.retry.backoff_ms.clone(),
        }
    }

    pub fn safety_retry_options(&self) -> SafetyRetryOptions {
        SafetyRetryOptions {
            max_attempts: self.retry.safety_max_attempts,
            safety_delay_ms: self.retry.safety_delay_ms,
            network_delay_ms: self.retry.network_delay_ms,
            backoff_ms: self.retry.backoff_ms.clone(),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_safety_attempts: self.jobs.max_safety_attempts,
            max_network_attempts: self.jobs.max_network_attempts,
            safety_delay_ms: self.jobs.safety_delay_ms,
            network_delay_ms: self.jobs.network_delay_ms,
            backoff_ms: self.jobs.backoff_ms.clone(),
            recents_capacity: self.jobs.recents_capacity,
            eviction_delay_ms: self.jobs.eviction_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.base_url, "https://gen.pollinations.ai");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.safety_max_attempts, 50);
        assert_eq!(config.jobs.max_safety_attempts, 30);
        assert_eq!(config.jobs.recents_capacity, 5);
        assert_eq!(config.defaults.image.model, "flux");
        assert_eq!(config.defaults.edit.model, "kontext");
        assert_eq!(config.defaults.video.model, "veo");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[api]
keys = ["key-one", "key-two"]

[defaults.image]
model = "turbo"
"#
        )
        .unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.api.keys.len(), 2);
        assert_eq!(config.api.base_url, "https://gen.pollinations.ai");
        assert_eq!(config.defaults.image.model, "turbo");
        assert_eq!(config.defaults.image.width, 1024);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut config = Config::default();
        config.api.base_url = "gen.pollinations.ai".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_filename_format_rejected() {
        let mut config = Config::default();
        config.downloads.filename_format = "fancy".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.jobs.max_network_attempts, 3);
    }

    #[test]
    fn test_image_defaults_to_params() {
        let params = ImageDefaults::default().to_params();
        assert_eq!(params.get("model").unwrap().to_string(), "flux");
        assert_eq!(params.get("private").unwrap().to_string(), "true");
        assert_eq!(params.get("nofeed").unwrap().to_string(), "true");
        assert_eq!(params.get("seed").unwrap().to_string(), "-1");
    }

    #[test]
    fn test_tilde_expansion() {
        let config = Config::default();
        assert!(!config.download_dir().to_string_lossy().contains('~'));
        assert!(!config.gallery_dir().to_string_lossy().contains('~'));
    }
}
