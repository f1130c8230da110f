#![cfg(all(feature = "camera", target_os = "linux"))]

use super::{ensure_supported, CaptureMode, FrameSource, PixelFormat, CAPTURE_BUFFER_COUNT};
use crate::error::DeviceError;
use crate::frame::RawFrame;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Dequeue timeout before a read is reported as failed
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 camera with a small ring of mmap'd hardware buffers
pub struct V4l2Source {
    path: String,
    mode: CaptureMode,
    // Declared before `device` so buffers are unmapped first
    stream: Option<Stream<'static>>,
    device: Option<Device>,
}

impl V4l2Source {
    /// Open `path`, negotiate `mode` and start streaming.
    ///
    /// Any capability or format negotiation failure is returned as an error
    /// and leaves the device closed.
    pub fn open(path: &str, mode: CaptureMode) -> Result<Self, DeviceError> {
        info!("Opening V4L2 device {} in mode {}", path, mode);

        let device = Device::with_path(path).map_err(|e| DeviceError::Open {
            device: path.to_string(),
            details: e.to_string(),
        })?;

        let caps = device.query_caps().map_err(|e| DeviceError::Capability {
            device: path.to_string(),
            details: format!("VIDIOC_QUERYCAP failed: {}", e),
        })?;
        info!("Driver: {} ({}), device: {}", caps.driver, caps.version.0, caps.card);

        if !caps
            .capabilities
            .contains(Flags::VIDEO_CAPTURE | Flags::STREAMING)
        {
            return Err(DeviceError::Capability {
                device: path.to_string(),
                details: "video capture with streaming I/O is not supported".to_string(),
            });
        }

        let modes = enumerate(&device, path, mode.format)?;
        info!(
            "Available modes on {}: {}",
            path,
            modes
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        ensure_supported(path, mode, &modes)?;

        let fourcc = FourCC::new(&mode.format.fourcc());
        let format = Format::new(mode.width, mode.height, fourcc);
        let actual = device
            .set_format(&format)
            .map_err(|e| DeviceError::Capability {
                device: path.to_string(),
                details: format!("VIDIOC_S_FMT failed: {}", e),
            })?;
        if actual.width != mode.width || actual.height != mode.height || actual.fourcc != fourcc {
            return Err(DeviceError::UnsupportedMode {
                device: path.to_string(),
                mode: mode.to_string(),
            });
        }

        let params = device
            .set_params(&Parameters::with_fps(mode.fps))
            .map_err(|e| DeviceError::Capability {
                device: path.to_string(),
                details: format!("VIDIOC_S_PARM failed: {}", e),
            })?;
        debug!(
            "Frame interval set to {}/{}",
            params.interval.numerator, params.interval.denominator
        );

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFER_COUNT)
            .map_err(|e| DeviceError::Capability {
                device: path.to_string(),
                details: format!("Failed to map {} capture buffers: {}", CAPTURE_BUFFER_COUNT, e),
            })?;
        stream.set_timeout(READ_TIMEOUT);

        info!("Device {} opened successfully", path);

        Ok(Self {
            path: path.to_string(),
            mode,
            stream: Some(stream),
            device: Some(device),
        })
    }

    /// Enumerate the discrete modes `path` supports for `format`
    pub fn modes(path: &str, format: PixelFormat) -> Result<Vec<CaptureMode>, DeviceError> {
        let device = Device::with_path(path).map_err(|e| DeviceError::Open {
            device: path.to_string(),
            details: e.to_string(),
        })?;
        enumerate(&device, path, format)
    }
}

fn enumerate(
    device: &Device,
    path: &str,
    format: PixelFormat,
) -> Result<Vec<CaptureMode>, DeviceError> {
    let fourcc = FourCC::new(&format.fourcc());
    let enum_error = |e: std::io::Error| DeviceError::Capability {
        device: path.to_string(),
        details: format!("Mode enumeration failed: {}", e),
    };

    let mut modes = Vec::new();
    for size in device.enum_framesizes(fourcc).map_err(enum_error)? {
        let (width, height) = match size.size {
            FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
            FrameSizeEnum::Stepwise(_) => {
                warn!("Skipping stepwise frame size on {}", path);
                continue;
            }
        };

        for interval in device
            .enum_frameintervals(fourcc, width, height)
            .map_err(enum_error)?
        {
            match interval.interval {
                FrameIntervalEnum::Discrete(fraction) if fraction.numerator > 0 => {
                    let fps = fraction.denominator / fraction.numerator;
                    modes.push(CaptureMode::new(width, height, fps, format));
                }
                _ => trace!("Skipping non-discrete frame interval on {}", path),
            }
        }
    }

    Ok(modes)
}

impl FrameSource for V4l2Source {
    fn mode(&self) -> CaptureMode {
        self.mode
    }

    fn read(&mut self) -> Result<RawFrame, DeviceError> {
        let stream = self.stream.as_mut().ok_or(DeviceError::NotOpen)?;

        let dequeue_start = Instant::now();
        // The previously returned buffer is queued back inside `next`, after
        // the caller's copy of it was taken.
        let (buffer, meta) = stream.next().map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                DeviceError::Timeout {
                    millis: READ_TIMEOUT.as_millis() as u64,
                }
            } else {
                DeviceError::Read {
                    details: e.to_string(),
                }
            }
        })?;
        let dequeued = Instant::now();

        let used = (meta.bytesused as usize).min(buffer.len());
        let data = buffer[..used].to_vec();

        trace!(
            "v4l read {} bytes (dequeue: {:?}, copy: {:?})",
            used,
            dequeued - dequeue_start,
            dequeued.elapsed()
        );

        Ok(RawFrame::new(
            data,
            self.mode.width,
            self.mode.height,
            self.mode.format,
        ))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed V4L2 stream on {}", self.path);
        }
        self.device = None;
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}
