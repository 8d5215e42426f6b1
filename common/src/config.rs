use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which capture backend provides frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Synthetic scene, no hardware required.
    Simulated,
    /// Physical devices through librealsense (needs the `realsense` feature).
    RealSense,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_backend")]
    pub backend: CaptureBackend,
    /// Number of simulated devices reported by the simulated backend.
    #[serde(default = "default_simulated_devices")]
    pub simulated_devices: usize,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default = "default_point_size")]
    pub point_size: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Directory receiving session directories and manual snapshots.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            simulated_devices: default_simulated_devices(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window_title: default_window_title(),
            point_size: default_point_size(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.capture.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "capture.fps must be positive, got {}",
                config.capture.fps
            )));
        }
        if config.capture.width == 0 || config.capture.height == 0 {
            return Err(ConfigError::Invalid(
                "capture.width and capture.height must be non-zero".into(),
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_backend() -> CaptureBackend {
    CaptureBackend::Simulated
}
fn default_simulated_devices() -> usize {
    1
}
fn default_width() -> u32 {
    320
}
fn default_height() -> u32 {
    240
}
fn default_fps() -> f64 {
    30.0
}
fn default_window_title() -> String {
    "RealSense Viewer".into()
}
fn default_point_size() -> f32 {
    2.0
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_level() -> String {
    "info".into()
}
