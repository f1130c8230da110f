#![cfg(all(feature = "hw_decode", target_os = "linux"))]

use super::Decoder;
use crate::camera::PixelFormat;
use crate::error::DecodeError;
use crate::frame::{DecodedImage, RawFrame};
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::{AppSink, AppSrc};
use gstreamer_video::VideoInfo;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Time allowed for one frame to come out of the decoder
const PULL_TIMEOUT_MS: u64 = 500;

/// Numbers the buffers pushed into the decoder so that a late sample from
/// an earlier frame is never paired with the current one
#[derive(Debug, Default)]
struct FrameTags {
    next: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleMatch {
    Stale,
    Current,
    Untagged,
}

impl FrameTags {
    fn issue(&mut self) -> u64 {
        let tag = self.next;
        self.next += 1;
        tag
    }

    fn classify(expected: u64, tag: Option<u64>) -> SampleMatch {
        match tag {
            Some(tag) if tag < expected => SampleMatch::Stale,
            Some(_) => SampleMatch::Current,
            None => SampleMatch::Untagged,
        }
    }
}

fn backend<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> DecodeError + '_ {
    move |e| DecodeError::Backend {
        details: format!("{}: {}", context, e),
    }
}

/// JPEG decoder running on the V4L2 memory-to-memory decoder via GStreamer
pub struct GstJpegDecoder {
    pipeline: Pipeline,
    appsrc: AppSrc,
    appsink: AppSink,
    tags: FrameTags,
}

impl GstJpegDecoder {
    pub fn new() -> Result<Self, DecodeError> {
        gstreamer::init().map_err(backend("Failed to initialize GStreamer"))?;

        let pipeline_desc = "appsrc name=src format=time is-live=true do-timestamp=false caps=image/jpeg ! \
             jpegparse ! \
             v4l2jpegdec ! \
             videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=2 drop=false emit-signals=false";
        debug!("Decoder pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(pipeline_desc)
            .map_err(backend("Failed to create decoder pipeline"))?
            .downcast::<Pipeline>()
            .map_err(|_| DecodeError::Backend {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<AppSrc>().ok())
            .ok_or_else(|| DecodeError::Backend {
                details: "Failed to get appsrc element".to_string(),
            })?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<AppSink>().ok())
            .ok_or_else(|| DecodeError::Backend {
                details: "Failed to get appsink element".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(backend("Failed to start decoder pipeline"))?;

        info!("Hardware JPEG decoder started");
        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            tags: FrameTags::default(),
        })
    }

    /// Discard samples left behind by frames whose pull timed out
    fn drain_stale(&self) {
        let mut drained = 0;
        while self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::ZERO)
            .is_some()
        {
            drained += 1;
        }
        if drained > 0 {
            debug!("Discarded {} late decoded frames", drained);
        }
    }

    fn pull_image(&self, expected: u64) -> Result<DecodedImage, DecodeError> {
        let deadline = Instant::now() + Duration::from_millis(PULL_TIMEOUT_MS);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let sample = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_nseconds(
                    remaining.as_nanos() as u64,
                ))
                .ok_or_else(|| DecodeError::Backend {
                    details: format!("No decoded frame within {}ms", PULL_TIMEOUT_MS),
                })?;

            let tag = sample
                .buffer()
                .and_then(|buffer| buffer.pts())
                .map(|pts| pts.mseconds());
            match FrameTags::classify(expected, tag) {
                SampleMatch::Stale => {
                    debug!("Skipping late decoded frame {:?}", tag);
                    continue;
                }
                SampleMatch::Untagged => {
                    debug!("Decoded frame lost its timestamp, assuming frame {}", expected)
                }
                SampleMatch::Current => {}
            }
            return Self::image_from_sample(&sample);
        }
    }

    fn image_from_sample(sample: &gstreamer::Sample) -> Result<DecodedImage, DecodeError> {
        let caps = sample.caps().ok_or_else(|| DecodeError::Backend {
            details: "No caps in sample".to_string(),
        })?;
        let video_info = VideoInfo::from_caps(caps).map_err(backend("Failed to get video info"))?;
        let buffer = sample.buffer().ok_or_else(|| DecodeError::Backend {
            details: "No buffer in sample".to_string(),
        })?;
        let map = buffer
            .map_readable()
            .map_err(backend("Failed to map buffer"))?;

        let (width, height) = (video_info.width(), video_info.height());
        let stride = video_info.stride()[0] as usize;
        let row = width as usize * 3;
        let mut pixels = Vec::with_capacity(row * height as usize);
        for line in map.as_slice().chunks(stride).take(height as usize) {
            pixels.extend_from_slice(&line[..row.min(line.len())]);
        }

        DecodedImage::from_raw(width, height, pixels).ok_or_else(|| DecodeError::Backend {
            details: format!("Decoded buffer does not fill {}x{}", width, height),
        })
    }
}

impl Decoder for GstJpegDecoder {
    fn name(&self) -> &'static str {
        "hardware"
    }

    fn decode(&mut self, raw: &RawFrame) -> Result<DecodedImage, DecodeError> {
        if raw.format != PixelFormat::Mjpeg {
            return Err(DecodeError::Backend {
                details: format!("Hardware decoder cannot decode {}", raw.format),
            });
        }

        self.drain_stale();

        let tag = self.tags.issue();
        let mut buffer = gstreamer::Buffer::from_slice(raw.data.clone());
        buffer
            .make_mut()
            .set_pts(gstreamer::ClockTime::from_mseconds(tag));
        self.appsrc
            .push_buffer(buffer)
            .map_err(backend("Failed to push buffer"))?;

        self.pull_image(tag)
    }
}

impl Drop for GstJpegDecoder {
    fn drop(&mut self) {
        let _ = self.appsrc.end_of_stream();
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop decoder pipeline: {}", e);
        }
    }
}
