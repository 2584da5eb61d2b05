//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where downloaded artifacts and segments are written.
    pub output_dir: PathBuf,

    /// Prefix for artifact filenames (`{app}-{timestamp}.{ext}`).
    pub app_name: String,

    /// Default export parameters.
    pub export: ExportDefaults,

    /// Delivery backend tuning.
    pub delivery: DeliveryConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters applied when the user does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDefaults {
    /// Resolution preset (`720p`, `1080p`, `4k`).
    pub resolution: String,

    /// Frame rate.
    pub fps: u32,

    /// Duration in seconds.
    pub duration_secs: f64,

    /// Video bitrate in Mbps.
    pub bitrate_mbps: f64,

    /// Container format (`mp4`, `webm`).
    pub format: String,

    /// Video codec (`avc`, `hevc`, `vp9`, `av1`).
    pub codec: String,

    /// Warm-up frames rendered before capture.
    pub warmup_frames: u32,
}

/// How segments are cut in segmented delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SegmentPolicy {
    /// Close a segment once it spans this many seconds of video.
    MaxDuration(f64),
    /// Close a segment once it holds this many encoded bytes.
    MaxBytes(u64),
}

/// Delivery backend tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Encoded chunks buffered between the frame loop and the stream writer.
    pub stream_buffer_chunks: usize,

    /// Segment cutting policy.
    pub segment_policy: SegmentPolicy,

    /// Upper bound for in-memory artifacts in bytes (`None` = unbounded).
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,

    /// ffmpeg binary used for encoding and capability probing.
    pub ffmpeg_binary: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "mdim=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_exports(),
            app_name: "mdimension".to_string(),
            export: ExportDefaults::default(),
            delivery: DeliveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            resolution: "1080p".to_string(),
            fps: 60,
            duration_secs: 10.0,
            bitrate_mbps: 12.0,
            format: "mp4".to_string(),
            codec: "avc".to_string(),
            warmup_frames: 8,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            stream_buffer_chunks: 32,
            segment_policy: SegmentPolicy::MaxDuration(30.0),
            memory_limit_bytes: None,
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("mdim").join("config.json")
}

/// Default artifact directory.
fn dirs_default_exports() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("mdim").join("exports")
}
