use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the snapshot service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Camera access configuration
    #[serde(default)]
    pub camera: CameraConfig,
    /// On-disk archive configuration
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Export configuration
    #[serde(default)]
    pub export: ExportConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port, 0 disables the Prometheus exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Camera snapshot configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Path appended to the camera address to reach the still image
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Upper bound on a single snapshot request in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User agent sent to the camera
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Archive directory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding the timestamp-named frames
    #[serde(default = "default_archive_directory")]
    pub directory: PathBuf,
    /// Directory receiving export artifacts (zip, gif, video)
    #[serde(default = "default_export_directory")]
    pub export_directory: PathBuf,
    /// JPEG quality used when persisting frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Export configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Frame rate used when a request does not name one
    #[serde(default = "default_frame_rate")]
    pub default_frame_rate: i64,
    /// ffmpeg binary used for video export
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// ffmpeg video codec
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// Four character code stamped on the video stream
    #[serde(default = "default_video_fourcc")]
    pub video_fourcc: String,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "snapvault".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_snapshot_path() -> String {
    "/snapshot.jpg".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("snapvault/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_archive_directory() -> PathBuf {
    PathBuf::from("saved_images")
}

fn default_export_directory() -> PathBuf {
    PathBuf::from("exports")
}

fn default_jpeg_quality() -> u8 {
    95
}

fn default_frame_rate() -> i64 {
    1
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_video_codec() -> String {
    "mpeg4".to_string()
}

fn default_video_fourcc() -> String {
    "DIVX".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/snapvault").required(false))
            .add_source(config::File::with_name("/etc/snapvault/snapvault").required(false))
            // SNAPVAULT__API__PORT -> api.port
            .add_source(
                config::Environment::with_prefix("SNAPVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "camera.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if !(1..=100).contains(&self.archive.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                key: "archive.jpeg_quality".to_string(),
                message: format!("{} is outside 1-100", self.archive.jpeg_quality),
            });
        }

        if self.archive.directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("archive.directory".to_string()));
        }

        // Artifacts in the archive directory would be listed as frames
        if self.archive.directory == self.archive.export_directory {
            return Err(ConfigError::InvalidValue {
                key: "archive.export_directory".to_string(),
                message: "must differ from archive.directory".to_string(),
            });
        }

        if self.export.video_fourcc.chars().count() != 4 {
            return Err(ConfigError::InvalidValue {
                key: "export.video_fourcc".to_string(),
                message: format!("{:?} is not a four character code", self.export.video_fourcc),
            });
        }

        Ok(())
    }
}

impl CameraConfig {
    /// Get the camera request timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: default_archive_directory(),
            export_directory: default_export_directory(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_frame_rate: default_frame_rate(),
            ffmpeg_path: default_ffmpeg_path(),
            video_codec: default_video_codec(),
            video_fourcc: default_video_fourcc(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.camera.snapshot_path, "/snapshot.jpg");
        assert_eq!(config.camera.timeout_secs, 10);
        assert_eq!(config.camera.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.archive.jpeg_quality, 95);
        assert_eq!(config.export.default_frame_rate, 1);
        assert_eq!(config.api.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.camera.timeout_secs = 0;

        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "camera.timeout_secs"),
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_export_directory_must_differ() {
        let mut config = Config::default();
        config.archive.export_directory = config.archive.directory.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fourcc_length() {
        let mut config = Config::default();
        config.export.video_fourcc = "XVID1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_source() {
        let source = config::Config::builder()
            .add_source(config::File::from_str(
                "[api]\nport = 9000\n[archive]\ndirectory = \"/tmp/frames\"",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: Config = source.try_deserialize().unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.archive.directory, PathBuf::from("/tmp/frames"));
        assert_eq!(config.camera.timeout_secs, 10);
    }
}
