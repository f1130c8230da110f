use crate::camera::PixelFormat;
use bytes::Bytes;
use chrono::{DateTime, Local};
use image::RgbImage;
use std::time::{Duration, Instant};

/// Decoded frame ready for annotation and encoding
pub type DecodedImage = RgbImage;

/// Owned copy of one captured hardware buffer
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame bytes; immutable once captured
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time reported by the source, if any
    pub timestamp: Option<DateTime<Local>>,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            timestamp: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Checkpoints recorded as a frame moves through the stages
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub captured: Option<Instant>,
    pub sent: Option<Instant>,
    pub decoded: Option<Instant>,
    pub processed: Option<Instant>,
    pub written: Option<Instant>,
}

impl StageTimings {
    fn span(from: Option<Instant>, to: Option<Instant>) -> Duration {
        match (from, to) {
            (Some(from), Some(to)) => to.saturating_duration_since(from),
            _ => Duration::ZERO,
        }
    }

    /// Time spent waiting in the capture→decode queue and decoding
    pub fn decode_cost(&self) -> Duration {
        Self::span(self.sent, self.decoded)
    }

    /// Overlay cost
    pub fn process_cost(&self) -> Duration {
        Self::span(self.decoded, self.processed)
    }

    /// Time spent waiting in the decode→write queue and encoding
    pub fn write_cost(&self) -> Duration {
        Self::span(self.processed, self.written)
    }

    /// End-to-end latency from capture to written
    pub fn total(&self) -> Duration {
        Self::span(self.captured, self.written)
    }
}

/// Unit of work flowing through the pipeline.
///
/// Exactly one stage owns a context at a time; it moves by value through the
/// inter-stage queues.
#[derive(Debug)]
pub struct FrameContext {
    /// Capture sequence number, starting at 0 for each run
    pub sequence: u64,
    /// Monotonic capture instant
    pub captured_at: Instant,
    /// Wall-clock time of the frame
    pub frame_time: DateTime<Local>,
    pub raw: Option<RawFrame>,
    pub decoded: Option<DecodedImage>,
    pub timings: StageTimings,
}

impl FrameContext {
    pub fn new(sequence: u64, frame_time: DateTime<Local>, raw: RawFrame) -> Self {
        let captured_at = Instant::now();
        Self {
            sequence,
            captured_at,
            frame_time,
            raw: Some(raw),
            decoded: None,
            timings: StageTimings {
                captured: Some(captured_at),
                ..StageTimings::default()
            },
        }
    }
}

/// Item carried by the inter-stage queues
#[derive(Debug)]
pub enum Packet {
    Frame(Box<FrameContext>),
    /// Terminates the receiving stage and is forwarded downstream once
    Quit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_context_starts_with_capture_checkpoint() {
        let raw = RawFrame::new(vec![0xFF, 0xD8, 0xFF, 0xD9], 2, 2, PixelFormat::Mjpeg);
        let ctx = FrameContext::new(7, Local::now(), raw);

        assert_eq!(ctx.sequence, 7);
        assert_eq!(ctx.timings.captured, Some(ctx.captured_at));
        assert!(ctx.decoded.is_none());
        assert_eq!(ctx.raw.as_ref().map(RawFrame::len), Some(4));
    }

    #[test]
    fn test_timings_ignore_missing_checkpoints() {
        let now = Instant::now();
        let timings = StageTimings {
            captured: Some(now),
            written: Some(now + Duration::from_millis(40)),
            ..StageTimings::default()
        };

        assert_eq!(timings.total(), Duration::from_millis(40));
        assert_eq!(timings.decode_cost(), Duration::ZERO);
    }
}
