mod builder;
mod interface;
mod synthetic;

pub use builder::{open_source, requested_mode, supported_modes};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use interface::V4l2Source;
pub use synthetic::{SyntheticClock, SyntheticSource};

use crate::error::DeviceError;
use crate::frame::RawFrame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware buffers kept in the capture ring
pub const CAPTURE_BUFFER_COUNT: u32 = 2;

/// Pixel format delivered by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PixelFormat {
    /// Compressed single-frame JPEG
    Mjpeg,
    /// Planar YUV 4:2:0 (I420)
    Yuv420,
}

impl PixelFormat {
    /// V4L2 FourCC code
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Mjpeg => *b"MJPG",
            PixelFormat::Yuv420 => *b"YU12",
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Exact buffer size for uncompressed formats
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        match self {
            PixelFormat::Mjpeg => None,
            PixelFormat::Yuv420 => {
                let (w, h) = (width as usize, height as usize);
                Some(w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)))
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Mjpeg => write!(f, "MJPG"),
            PixelFormat::Yuv420 => write!(f, "YUV420"),
        }
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "mjpg" | "mjpeg" => Ok(PixelFormat::Mjpeg),
            "yuv" | "yuv420" | "i420" => Ok(PixelFormat::Yuv420),
            _ => Err(DeviceError::UnsupportedFormat { format: value }),
        }
    }
}

impl From<PixelFormat> for String {
    fn from(format: PixelFormat) -> Self {
        format.to_string()
    }
}

/// Capture mode: resolution, frame rate and pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl CaptureMode {
    pub fn new(width: u32, height: u32, fps: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            format,
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}@{}", self.format, self.width, self.height, self.fps)
    }
}

/// Owner of an opened camera device.
///
/// `read` blocks until the oldest completed hardware buffer is available and
/// returns an owned copy of it; the hardware buffer is handed back to the
/// driver only after the copy is taken.
pub trait FrameSource: Send {
    /// Mode negotiated at open
    fn mode(&self) -> CaptureMode;

    fn read(&mut self) -> Result<RawFrame, DeviceError>;

    /// Release the device; further reads fail with `NotOpen`
    fn close(&mut self);
}

/// Fail unless `mode` is one of the enumerated `modes`
#[cfg(any(test, all(feature = "camera", target_os = "linux")))]
pub(crate) fn ensure_supported(
    device: &str,
    mode: CaptureMode,
    modes: &[CaptureMode],
) -> Result<(), DeviceError> {
    if modes.contains(&mode) {
        Ok(())
    } else {
        Err(DeviceError::UnsupportedMode {
            device: device.to_string(),
            mode: mode.to_string(),
        })
    }
}
