use super::{CaptureMode, FrameSource, PixelFormat};
use crate::config::CameraConfig;
use crate::error::DeviceError;
use tracing::info;

/// Mode requested by the camera configuration
pub fn requested_mode(config: &CameraConfig) -> CaptureMode {
    CaptureMode::new(
        config.resolution.0,
        config.resolution.1,
        config.fps,
        config.pixel_format,
    )
}

/// Enumerate the modes `device` supports for `format`
#[cfg(all(feature = "camera", target_os = "linux"))]
pub fn supported_modes(device: &str, format: PixelFormat) -> Result<Vec<CaptureMode>, DeviceError> {
    super::V4l2Source::modes(device, format)
}

/// Enumerate the modes `device` supports for `format`
#[cfg(not(all(feature = "camera", target_os = "linux")))]
pub fn supported_modes(device: &str, format: PixelFormat) -> Result<Vec<CaptureMode>, DeviceError> {
    Err(DeviceError::Open {
        device: device.to_string(),
        details: format!("V4L2 capture of {} is not available in this build", format),
    })
}

/// Open the configured camera
#[cfg(all(feature = "camera", target_os = "linux"))]
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, DeviceError> {
    let mode = requested_mode(config);
    let source = super::V4l2Source::open(&config.device, mode)?;
    info!("Capturing from {} in mode {}", config.device, mode);
    Ok(Box::new(source))
}

/// Open a synthetic source when V4L2 capture is unavailable
#[cfg(not(all(feature = "camera", target_os = "linux")))]
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>, DeviceError> {
    #[cfg(not(target_os = "linux"))]
    tracing::warn!("V4L2 camera interface is only available on Linux, using synthetic source");
    #[cfg(not(feature = "camera"))]
    tracing::warn!("Camera feature is disabled, using synthetic source");

    let mode = requested_mode(config);
    info!("Synthetic capture for {} in mode {}", config.device, mode);
    Ok(Box::new(super::SyntheticSource::open(mode)))
}
