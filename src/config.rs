use crate::annotate::{FpsDisplay, Position};
use crate::camera::PixelFormat;
use crate::decode::DecoderKind;
use crate::recording::OutputCodec;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HomecamConfig {
    pub camera: CameraConfig,
    pub recording: RecordingConfig,
    pub overlay: OverlayConfig,
    pub pipeline: PipelineConfig,
    pub stream: StreamConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera device path (e.g. /dev/video0)
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Pixel format delivered by the camera (MJPG or YUV420)
    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,

    /// Decoder backend used for captured frames
    #[serde(default = "default_decoder")]
    pub decoder: DecoderKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Output codec for video files
    #[serde(default = "default_output_codec")]
    pub output_codec: OutputCodec,

    /// Length of each video file in seconds
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u32,

    /// Directory receiving the rotating video files
    #[serde(default = "default_save_directory")]
    pub save_directory: PathBuf,

    /// Encoder worker threads
    #[serde(default = "default_video_threads")]
    pub video_threads: u32,

    /// Maintain recordings.json next to the video files
    #[serde(default = "default_write_index")]
    pub write_index: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OverlayConfig {
    /// Draw the timestamp overlay
    #[serde(default = "default_overlay_enabled")]
    pub enabled: bool,

    /// Where the timestamp is drawn
    #[serde(default = "default_overlay_position")]
    pub position: Position,

    /// Path to TrueType font file for the overlay
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,

    /// Font height in pixels
    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// When to append the measured frame rate
    #[serde(default = "default_display_fps")]
    pub display_fps: FpsDisplay,

    /// IANA timezone for the timestamp text
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Queue depth that logs a warning
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: usize,

    /// Queue depth that pauses production upstream
    #[serde(default = "default_pause_threshold")]
    pub pause_threshold: usize,

    /// Consecutive capture failures tolerated before capture stops
    #[serde(default = "default_max_read_failures")]
    pub max_consecutive_read_failures: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastTap {
    /// Raw camera bytes straight after capture
    Capture,
    /// JPEG re-encoded after the overlay is drawn
    Annotated,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// Serve live viewers
    #[serde(default = "default_stream_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_stream_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_stream_port")]
    pub port: u16,

    /// Worker threads for viewer I/O
    #[serde(default = "default_web_threads")]
    pub web_threads: usize,

    /// Frames buffered per viewer before frames are dropped for it
    #[serde(default = "default_send_backlog")]
    pub send_backlog: usize,

    /// Consecutive dropped frames before a viewer is disconnected
    #[serde(default = "default_max_backlog_drops")]
    pub max_backlog_drops: u32,

    /// Where frames are tapped for broadcast
    #[serde(default = "default_tap")]
    pub tap: BroadcastTap,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    /// Unix socket of the supervising process
    pub socket: Option<PathBuf>,

    /// Heartbeat timeout in milliseconds used by supervisors
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl HomecamConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let defaults = toml::to_string(&Self::default())
            .map_err(|e| ConfigError::Message(format!("Failed to render defaults: {}", e)))?;

        let settings = Config::builder()
            // Start with default values
            .add_source(File::from_str(&defaults, config::FileFormat::Toml))
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with HOMECAM_ prefix
            .add_source(
                Environment::with_prefix("HOMECAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: HomecamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        // File names have one-second granularity
        if self.recording.duration_seconds < 1 {
            return Err(ConfigError::Message(
                "Recording duration_seconds must be at least 1".to_string(),
            ));
        }

        if !self.recording.output_codec.is_available() {
            return Err(ConfigError::Message(format!(
                "Output codec {} requires the video_encoding feature",
                self.recording.output_codec
            )));
        }

        if !self.camera.decoder.is_available() {
            return Err(ConfigError::Message(format!(
                "Decoder {:?} requires the hw_decode feature",
                self.camera.decoder
            )));
        }

        if self.recording.video_threads == 0 {
            return Err(ConfigError::Message(
                "Recording video_threads must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.warn_threshold == 0 {
            return Err(ConfigError::Message(
                "Pipeline warn_threshold must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.pause_threshold <= self.pipeline.warn_threshold {
            return Err(ConfigError::Message(
                "Pipeline pause_threshold must be greater than warn_threshold".to_string(),
            ));
        }

        if self.pipeline.max_consecutive_read_failures == 0 {
            return Err(ConfigError::Message(
                "Pipeline max_consecutive_read_failures must be greater than 0".to_string(),
            ));
        }

        if self.overlay.font_size <= 0.0 {
            return Err(ConfigError::Message(
                "Overlay font_size must be greater than 0".to_string(),
            ));
        }

        if self.overlay.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown overlay timezone '{}'",
                self.overlay.timezone
            )));
        }

        if self.stream.web_threads == 0 {
            return Err(ConfigError::Message(
                "Stream web_threads must be greater than 0".to_string(),
            ));
        }

        if self.stream.send_backlog == 0 {
            return Err(ConfigError::Message(
                "Stream send_backlog must be greater than 0".to_string(),
            ));
        }

        if self.stream.enabled
            && self.stream.tap == BroadcastTap::Capture
            && self.camera.pixel_format != PixelFormat::Mjpeg
        {
            return Err(ConfigError::Message(
                "Stream tap 'capture' requires the MJPG camera pixel format".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for HomecamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device: default_camera_device(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                pixel_format: default_pixel_format(),
                decoder: default_decoder(),
            },
            recording: RecordingConfig {
                output_codec: default_output_codec(),
                duration_seconds: default_duration_seconds(),
                save_directory: default_save_directory(),
                video_threads: default_video_threads(),
                write_index: default_write_index(),
            },
            overlay: OverlayConfig {
                enabled: default_overlay_enabled(),
                position: default_overlay_position(),
                font_path: default_font_path(),
                font_size: default_font_size(),
                display_fps: default_display_fps(),
                timezone: default_timezone(),
            },
            pipeline: PipelineConfig {
                warn_threshold: default_warn_threshold(),
                pause_threshold: default_pause_threshold(),
                max_consecutive_read_failures: default_max_read_failures(),
            },
            stream: StreamConfig {
                enabled: default_stream_enabled(),
                ip: default_stream_ip(),
                port: default_stream_port(),
                web_threads: default_web_threads(),
                send_backlog: default_send_backlog(),
                max_backlog_drops: default_max_backlog_drops(),
                tap: default_tap(),
            },
            control: ControlConfig::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket: None,
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

// Default value functions
fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Mjpeg
}
fn default_decoder() -> DecoderKind {
    DecoderKind::Software
}

fn default_output_codec() -> OutputCodec {
    OutputCodec::Mjpeg
}
fn default_duration_seconds() -> u32 {
    600
}
fn default_save_directory() -> PathBuf {
    PathBuf::from("./recordings")
}
fn default_video_threads() -> u32 {
    2
}
fn default_write_index() -> bool {
    true
}

fn default_overlay_enabled() -> bool {
    true
}
fn default_overlay_position() -> Position {
    Position::TopRight
}
fn default_font_path() -> PathBuf {
    PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
}
fn default_font_size() -> f32 {
    24.0
}
fn default_display_fps() -> FpsDisplay {
    FpsDisplay::WarnOnly
}
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_warn_threshold() -> usize {
    10
}
fn default_pause_threshold() -> usize {
    60
}
fn default_max_read_failures() -> u32 {
    5
}

fn default_stream_enabled() -> bool {
    true
}
fn default_stream_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_stream_port() -> u16 {
    8080
}
fn default_web_threads() -> usize {
    2
}
fn default_send_backlog() -> usize {
    8
}
fn default_max_backlog_drops() -> u32 {
    90
}
fn default_tap() -> BroadcastTap {
    BroadcastTap::Capture
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HomecamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.duration_seconds, 600);
        assert_eq!(config.camera.pixel_format, PixelFormat::Mjpeg);
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut config = HomecamConfig::default();
        config.recording.duration_seconds = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duration_seconds"));
    }

    #[test]
    fn test_pause_threshold_must_exceed_warn() {
        let mut config = HomecamConfig::default();
        config.pipeline.warn_threshold = 20;
        config.pipeline.pause_threshold = 20;
        assert!(config.validate().is_err());

        config.pipeline.pause_threshold = 21;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = HomecamConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.overlay.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capture_tap_requires_mjpeg() {
        let mut config = HomecamConfig::default();
        config.camera.pixel_format = PixelFormat::Yuv420;
        assert!(config.validate().is_err());

        config.stream.tap = BroadcastTap::Annotated;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
fps = 15
pixel_format = "YUV420"

[recording]
duration_seconds = 2
output_codec = "yuv420"

[stream]
tap = "annotated"
"#
        )
        .unwrap();

        let config = HomecamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.fps, 15);
        assert_eq!(config.camera.pixel_format, PixelFormat::Yuv420);
        assert_eq!(config.recording.duration_seconds, 2);
        assert_eq!(config.recording.output_codec, OutputCodec::Yuv420);
        assert_eq!(config.stream.tap, BroadcastTap::Annotated);
        // Untouched values keep their defaults
        assert_eq!(config.stream.port, 8080);
        assert!(config.validate().is_ok());
    }
}
