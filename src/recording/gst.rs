#![cfg(all(feature = "video_encoding", target_os = "linux"))]

use super::{OutputCodec, VideoEncoder};
use crate::error::WriterError;
use crate::frame::DecodedImage;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use gstreamer_video::{VideoFormat, VideoInfo};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Time allowed for the muxer to finish the file after EOS
const FINALIZE_TIMEOUT_SECS: u64 = 10;

fn encoder_chain(codec: OutputCodec, threads: u32) -> Option<String> {
    let chain = match codec {
        OutputCodec::H264 => format!(
            "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=veryfast threads={} ! h264parse",
            threads
        ),
        OutputCodec::H265 => format!(
            "videoconvert ! video/x-raw,format=I420 ! x265enc speed-preset=veryfast option-string=pools={} ! h265parse",
            threads
        ),
        OutputCodec::Mpeg2 => format!(
            "videoconvert ! video/x-raw,format=I420 ! avenc_mpeg2video threads={} ! mpegvideoparse",
            threads
        ),
        OutputCodec::Mpeg4 => format!(
            "videoconvert ! video/x-raw,format=I420 ! avenc_mpeg4 threads={} ! mpeg4videoparse",
            threads
        ),
        OutputCodec::Raw => "videoconvert ! video/x-raw,format=I420".to_string(),
        OutputCodec::Mjpeg | OutputCodec::Yuv420 => return None,
    };
    Some(chain)
}

/// Container video file written through a GStreamer encoding pipeline
pub struct GstFileEncoder {
    path: PathBuf,
    pipeline: Pipeline,
    appsrc: AppSrc,
    info: VideoInfo,
    frame_duration: gstreamer::ClockTime,
    frames: u64,
}

impl GstFileEncoder {
    pub fn create(
        path: &Path,
        codec: OutputCodec,
        fps: u32,
        size: (u32, u32),
        threads: u32,
    ) -> Result<Self, WriterError> {
        let open_error = |details: String| WriterError::Open {
            path: path.to_path_buf(),
            attempts: 1,
            details,
        };

        let chain = encoder_chain(codec, threads.max(1)).ok_or_else(|| {
            WriterError::CodecUnavailable {
                codec: codec.to_string(),
            }
        })?;

        gstreamer::init().map_err(|e| open_error(format!("Failed to initialize GStreamer: {}", e)))?;

        let fps = fps.max(1);
        let info = VideoInfo::builder(VideoFormat::Rgb, size.0, size.1)
            .fps(gstreamer::Fraction::new(fps as i32, 1))
            .build()
            .map_err(|e| open_error(format!("Invalid video info: {}", e)))?;
        let caps = info
            .to_caps()
            .map_err(|e| open_error(format!("Invalid caps: {}", e)))?;

        let pipeline_desc = format!(
            "appsrc name=src format=time is-live=false ! {} ! qtmux ! filesink location=\"{}\"",
            chain,
            path.to_string_lossy()
        );
        debug!("Encoder pipeline ({}): {}", codec, pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_error("Failed to downcast to Pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<AppSrc>().ok())
            .ok_or_else(|| open_error("Failed to get appsrc element".to_string()))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_property("format", gstreamer::Format::Time);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(format!("Failed to start pipeline: {}", e)))?;

        info!("Started GStreamer {} encoder for {}", codec, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            appsrc,
            info,
            frame_duration: gstreamer::ClockTime::from_nseconds(1_000_000_000 / fps as u64),
            frames: 0,
        })
    }

    /// Copy `image` into a buffer laid out with the negotiated row stride
    fn pack(&self, image: &DecodedImage) -> Vec<u8> {
        let stride = self.info.stride()[0] as usize;
        let row = image.width() as usize * 3;
        let mut data = vec![0u8; stride * image.height() as usize];
        for (dst, src) in data
            .chunks_mut(stride)
            .zip(image.as_raw().chunks(row))
        {
            dst[..row].copy_from_slice(src);
        }
        data
    }
}

impl VideoEncoder for GstFileEncoder {
    fn write_frame(&mut self, image: &DecodedImage) -> Result<(), WriterError> {
        let mut buffer = gstreamer::Buffer::from_mut_slice(self.pack(image));
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(self.frame_duration * self.frames);
            buffer.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| WriterError::Write {
                path: self.path.clone(),
                details: format!("Failed to push buffer: {:?}", e),
            })?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), WriterError> {
        let finalize_error = |details: String| WriterError::Finalize {
            path: self.path.clone(),
            details,
        };

        self.appsrc
            .end_of_stream()
            .map_err(|e| finalize_error(format!("Failed to signal EOS: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| finalize_error("Pipeline has no bus".to_string()))?;

        let mut result = Ok(());
        for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS)) {
            match msg.view() {
                gstreamer::MessageView::Eos(..) => break,
                gstreamer::MessageView::Error(err) => {
                    result = Err(finalize_error(format!(
                        "{} ({})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    )));
                    break;
                }
                _ => {}
            }
        }

        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop encoder pipeline: {}", e);
        }

        debug!("Finalized {} ({} frames)", self.path.display(), self.frames);
        result
    }
}
