use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HomecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Annotation error: {0}")]
    Annotate(#[from] AnnotateError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Control channel error: {0}")]
    Control(#[from] ControlError),

    #[error("System error: {message}")]
    System { message: String },
}

impl HomecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Camera device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open device {device}: {details}")]
    Open { device: String, details: String },

    #[error("Device {device} lacks required capabilities: {details}")]
    Capability { device: String, details: String },

    #[error("Mode {mode} is not supported by {device}")]
    UnsupportedMode { device: String, mode: String },

    #[error("Unsupported pixel format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Frame read failed: {details}")]
    Read { details: String },

    #[error("Timed out waiting for a frame after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Frame source reached end of stream")]
    EndOfStream,

    #[error("Device is not open")]
    NotOpen,
}

impl DeviceError {
    /// Errors that can be retried on the next read
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Read { .. } | DeviceError::Timeout { .. })
    }
}

/// Frame decode errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Corrupt {format} frame: {details}")]
    Corrupt { format: String, details: String },

    #[error("Frame buffer too small: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },

    #[error("Decoder backend failure: {details}")]
    Backend { details: String },
}

/// Overlay rendering errors
#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Failed to read font file {path}: {source}")]
    FontRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse font file {path}")]
    FontParse { path: PathBuf },
}

/// Video file writer errors
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Failed to open {path} after {attempts} attempts: {details}")]
    Open {
        path: PathBuf,
        attempts: u32,
        details: String,
    },

    #[error("Failed to write frame to {path}: {details}")]
    Write { path: PathBuf, details: String },

    #[error("Frame size {actual:?} does not match file size {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Codec {codec} is not available in this build")]
    CodecUnavailable { codec: String },

    #[error("Rotation duration must be at least one second")]
    InvalidDuration,

    #[error("Failed to finalize {path}: {details}")]
    Finalize { path: PathBuf, details: String },
}

/// Pipeline coordination errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline stage {stage} failed: {details}")]
    StageFailed { stage: String, details: String },

    #[error("Protocol violation: {details}")]
    ProtocolViolation { details: String },

    #[error("Failed to spawn {stage} thread: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

/// Live stream server errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream server startup failed: {details}")]
    StartupFailed { details: String },
}

/// Supervisor control channel errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control channel closed by peer")]
    Closed,

    #[error("Unexpected control message: {message}")]
    Unexpected { message: String },

    #[error("Peer did not acknowledge within {millis}ms")]
    Unresponsive { millis: u64 },
}

pub type Result<T> = std::result::Result<T, HomecamError>;

/// Log and abort the process on an unrecoverable invariant break.
pub fn protocol_violation(details: &str) -> ! {
    tracing::error!("Protocol violation: {}", details);
    std::process::abort()
}
