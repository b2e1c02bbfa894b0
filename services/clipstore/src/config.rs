use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest part S3 accepts in a multipart upload (except the last)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Main configuration for the clipstore service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// External media tool and staging configuration
    #[serde(default)]
    pub media: MediaConfig,
    /// Aspect ratio classification thresholds
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Retry policy for object uploads
    #[serde(default)]
    pub retry: RetryConfig,
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
    /// Prometheus exporter port (disabled when unset)
    pub metrics_port: Option<u16>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for video storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (64MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    /// Part size for multipart uploads in bytes (16MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,
}

/// External tools and staging
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Path to the ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Wall-clock limit for a single tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Directory for staged files (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
    /// Upload ceiling in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Ratio ranges are exclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_wide_min")]
    pub wide_min: f64,
    #[serde(default = "default_wide_max")]
    pub wide_max: f64,
    #[serde(default = "default_tall_min")]
    pub tall_min: f64,
    #[serde(default = "default_tall_max")]
    pub tall_max: f64,
}

/// Bounded retry for object uploads
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (1 disables retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

// Default value functions
fn default_service_name() -> String {
    "clipstore".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    60
}

fn default_multipart_threshold() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_part_size() -> u64 {
    16 * 1024 * 1024 // 16MB
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_tool_timeout_secs() -> u64 {
    600
}

fn default_max_upload_bytes() -> u64 {
    10 << 30 // 10 GiB
}

fn default_wide_min() -> f64 {
    1.7
}

fn default_wide_max() -> f64 {
    1.8
}

fn default_tall_min() -> f64 {
    0.5
}

fn default_tall_max() -> f64 {
    0.6
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    200
}

fn default_max_interval_ms() -> u64 {
    5_000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "clipstore")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/clipstore").required(false))
            .add_source(config::File::with_name("/etc/clipstore/clipstore").required(false))
            // CLIPSTORE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("CLIPSTORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.trim().is_empty() {
            anyhow::bail!("s3.bucket must not be empty");
        }
        if self.s3.bucket.contains(',') {
            anyhow::bail!("s3.bucket must not contain ','");
        }
        if self.s3.presigned_url_expiry_secs == 0 {
            anyhow::bail!("s3.presigned_url_expiry_secs must be positive");
        }
        if self.s3.part_size_bytes < MIN_PART_SIZE {
            anyhow::bail!("s3.part_size_bytes must be at least {MIN_PART_SIZE}");
        }
        if self.media.tool_timeout_secs == 0 {
            anyhow::bail!("media.tool_timeout_secs must be positive");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        self.classification.validate()
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }

    /// Get tool timeout as Duration
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.media.tool_timeout_secs)
    }

    /// Staging directory, falling back to the system temp dir
    pub fn staging_dir(&self) -> PathBuf {
        self.media
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl ClassificationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.wide_min < self.wide_max) {
            anyhow::bail!(
                "classification wide range is empty: ({}, {})",
                self.wide_min,
                self.wide_max
            );
        }
        if !(self.tall_min < self.tall_max) {
            anyhow::bail!(
                "classification tall range is empty: ({}, {})",
                self.tall_min,
                self.tall_max
            );
        }
        if self.tall_min <= 0.0 {
            anyhow::bail!("classification tall_min must be positive");
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_path: default_ffmpeg_path(),
            tool_timeout_secs: default_tool_timeout_secs(),
            staging_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            wide_min: default_wide_min(),
            wide_max: default_wide_max(),
            tall_min: default_tall_min(),
            tall_max: default_tall_max(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}
