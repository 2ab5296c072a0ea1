//! Configuration schema.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working configuration.

use crate::request::{Params, DEFAULT_API_BASE};
use serde::{Deserialize, Serialize};

/// Upstream API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// API keys, tried in order; empty means anonymous tier.
    pub keys: Vec<String>,
    /// Wall-clock deadline for video generation.
    pub video_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            keys: Vec::new(),
            video_timeout_secs: 300,
        }
    }
}

/// Tuning for the one-shot retry policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: Vec<u64>,
    pub safety_max_attempts: u32,
    pub safety_delay_ms: u64,
    pub network_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![1000, 2000, 4000],
            safety_max_attempts: 50,
            safety_delay_ms: 500,
            network_delay_ms: 1000,
        }
    }
}

/// Tuning for the job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_safety_attempts: u32,
    pub max_network_attempts: u32,
    pub safety_delay_ms: u64,
    pub network_delay_ms: u64,
    pub backoff_ms: Vec<u64>,
    pub recents_capacity: usize,
    pub eviction_delay_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_safety_attempts: 30,
            max_network_attempts: 3,
            safety_delay_ms: 1000,
            network_delay_ms: 2000,
            backoff_ms: vec![1000, 2000, 4000],
            recents_capacity: 5,
            eviction_delay_ms: 2000,
        }
    }
}

/// Where and whether results are written to disk automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub auto_download: bool,
    /// Supports `~` expansion.
    pub dir: String,
    /// `prompt`, `timestamp`, or `both`.
    pub filename_format: String,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            auto_download: true,
            dir: "~/Hibiscus".to_string(),
            filename_format: "both".to_string(),
        }
    }
}

/// Gallery storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Supports `~` expansion.
    pub dir: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            dir: "~/.hibiscus/gallery".to_string(),
        }
    }
}

/// Default generation parameters for image jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDefaults {
    pub model: String,
    pub width: i64,
    pub height: i64,
    /// Negative means "random each time".
    pub seed: i64,
    pub guidance_scale: f64,
    pub enhance: bool,
    pub transparent: bool,
    pub nologo: bool,
    pub safe: bool,
}

impl Default for ImageDefaults {
    fn default() -> Self {
        Self {
            model: "flux".to_string(),
            width: 1024,
            height: 1024,
            seed: -1,
            guidance_scale: 7.5,
            enhance: false,
            transparent: false,
            nologo: false,
            safe: true,
        }
    }
}

impl ImageDefaults {
    /// Defaults for image-edit jobs differ only in model.
    pub fn for_edit() -> Self {
        Self {
            model: "kontext".to_string(),
            ..Self::default()
        }
    }

    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params
            .set("model", self.model.as_str())
            .set("width", self.width)
            .set("height", self.height)
            .set("seed", self.seed)
            .set("guidance_scale", self.guidance_scale)
            .set("enhance", self.enhance)
            .set("transparent", self.transparent)
            .set("nologo", self.nologo)
            .set("safe", self.safe)
            .set("private", true)
            .set("nofeed", true);
        params
    }
}

/// Default generation parameters for video jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoDefaults {
    pub model: String,
    pub duration: i64,
    pub aspect_ratio: String,
    pub audio: bool,
}

impl Default for VideoDefaults {
    fn default() -> Self {
        Self {
            model: "veo".to_string(),
            duration: 5,
            aspect_ratio: "landscape".to_string(),
            audio: false,
        }
    }
}

impl VideoDefaults {
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params
            .set("model", self.model.as_str())
            .set("duration", self.duration)
            .set("aspectRatio", self.aspect_ratio.as_str())
            .set("audio", self.audio)
            .set("private", true)
            .set("nofeed", true);
        params
    }
}

/// Per-kind generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub image: ImageDefaults,
    pub edit: ImageDefaults,
    pub video: VideoDefaults,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            image: ImageDefaults::default(),
            edit: ImageDefaults::for_edit(),
            video: VideoDefaults::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridable by `RUST_LOG`.
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
