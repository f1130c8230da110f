use super::{CaptureMode, FrameSource, PixelFormat};
use crate::error::DeviceError;
use crate::frame::RawFrame;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Timestamp policy for generated frames
#[derive(Debug, Clone, Copy)]
pub enum SyntheticClock {
    /// Frames carry the wall-clock time at which they are read
    Wall,
    /// Frame N carries `start + N * interval`
    Simulated {
        start: DateTime<Local>,
        interval: Duration,
    },
}

/// Test-pattern frame source.
///
/// Stands in for a camera when no device is available and drives the
/// pipeline in tests. Reads are paced to the mode's frame rate unless pacing
/// is disabled.
pub struct SyntheticSource {
    mode: CaptureMode,
    sequence: u64,
    limit: Option<u64>,
    fail_reads: HashSet<u64>,
    read_attempts: u64,
    clock: SyntheticClock,
    paced: bool,
    next_deadline: Option<Instant>,
    open: bool,
}

impl SyntheticSource {
    pub fn open(mode: CaptureMode) -> Self {
        debug!("Opened synthetic source in mode {}", mode);
        Self {
            mode,
            sequence: 0,
            limit: None,
            fail_reads: HashSet::new(),
            read_attempts: 0,
            clock: SyntheticClock::Wall,
            paced: true,
            next_deadline: None,
            open: true,
        }
    }

    /// End the stream after `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Fail the given read attempts (0-based) with a transient error
    pub fn with_failed_reads(mut self, attempts: impl IntoIterator<Item = u64>) -> Self {
        self.fail_reads.extend(attempts);
        self
    }

    pub fn with_clock(mut self, clock: SyntheticClock) -> Self {
        self.clock = clock;
        self
    }

    /// Return frames as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn pace(&mut self) {
        if !self.paced {
            return;
        }
        let interval = Duration::from_micros(1_000_000 / self.mode.fps.max(1) as u64);
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + interval);
    }

    fn frame_time(&self) -> DateTime<Local> {
        match self.clock {
            SyntheticClock::Wall => Local::now(),
            SyntheticClock::Simulated { start, interval } => {
                let offset = interval.saturating_mul(self.sequence as u32);
                start + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero())
            }
        }
    }

    fn render(&self) -> Result<Vec<u8>, DeviceError> {
        let shade = (self.sequence % 256) as u8;
        let image = RgbImage::from_fn(self.mode.width, self.mode.height, |x, y| {
            image::Rgb([shade, (x % 256) as u8, (y % 256) as u8])
        });

        match self.mode.format {
            PixelFormat::Mjpeg => {
                let mut out = Vec::new();
                JpegEncoder::new_with_quality(&mut out, 80)
                    .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
                    .map_err(|e| DeviceError::Read {
                        details: format!("Failed to encode test pattern: {}", e),
                    })?;
                Ok(out)
            }
            PixelFormat::Yuv420 => Ok(crate::decode::rgb_to_i420(&image)),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn mode(&self) -> CaptureMode {
        self.mode
    }

    fn read(&mut self) -> Result<RawFrame, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(DeviceError::EndOfStream);
        }

        let attempt = self.read_attempts;
        self.read_attempts += 1;
        self.pace();

        if self.fail_reads.contains(&attempt) {
            return Err(DeviceError::Read {
                details: format!("injected failure on read {}", attempt),
            });
        }

        let data = self.render()?;
        let timestamp = self.frame_time();
        trace!("Generated synthetic frame {} ({} bytes)", self.sequence, data.len());
        self.sequence += 1;

        let mut frame = RawFrame::new(data, self.mode.width, self.mode.height, self.mode.format);
        frame.timestamp = Some(timestamp);
        Ok(frame)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
