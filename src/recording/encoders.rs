use super::{EncoderFactory, OutputCodec, VideoEncoder};
use crate::decode::{encode_jpeg, rgb_to_i420, JPEG_QUALITY};
use crate::error::WriterError;
use crate::frame::DecodedImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

fn create_file(path: &Path) -> Result<BufWriter<File>, WriterError> {
    let file = File::create(path).map_err(|e| WriterError::Open {
        path: path.to_path_buf(),
        attempts: 1,
        details: e.to_string(),
    })?;
    Ok(BufWriter::new(file))
}

fn finish_file(path: &Path, mut out: BufWriter<File>) -> Result<(), WriterError> {
    out.flush()
        .and_then(|_| out.get_ref().sync_data())
        .map_err(|e| WriterError::Finalize {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
}

/// Raw planar I420 frames back to back (`.yuv`)
pub struct Yuv420FileEncoder {
    path: PathBuf,
    out: BufWriter<File>,
}

impl Yuv420FileEncoder {
    pub fn create(path: &Path) -> Result<Self, WriterError> {
        Ok(Self {
            path: path.to_path_buf(),
            out: create_file(path)?,
        })
    }
}

impl VideoEncoder for Yuv420FileEncoder {
    fn write_frame(&mut self, image: &DecodedImage) -> Result<(), WriterError> {
        self.out
            .write_all(&rgb_to_i420(image))
            .map_err(|e| WriterError::Write {
                path: self.path.clone(),
                details: e.to_string(),
            })
    }

    fn finish(self: Box<Self>) -> Result<(), WriterError> {
        finish_file(&self.path, self.out)
    }
}

/// Concatenated baseline JPEGs (`.mjpeg`)
pub struct MjpegFileEncoder {
    path: PathBuf,
    out: BufWriter<File>,
}

impl MjpegFileEncoder {
    pub fn create(path: &Path) -> Result<Self, WriterError> {
        Ok(Self {
            path: path.to_path_buf(),
            out: create_file(path)?,
        })
    }
}

impl VideoEncoder for MjpegFileEncoder {
    fn write_frame(&mut self, image: &DecodedImage) -> Result<(), WriterError> {
        let jpeg = encode_jpeg(image, JPEG_QUALITY).map_err(|e| WriterError::Write {
            path: self.path.clone(),
            details: format!("JPEG encoding failed: {}", e),
        })?;
        self.out.write_all(&jpeg).map_err(|e| WriterError::Write {
            path: self.path.clone(),
            details: e.to_string(),
        })
    }

    fn finish(self: Box<Self>) -> Result<(), WriterError> {
        finish_file(&self.path, self.out)
    }
}

/// Opens the encoder matching the requested codec
#[derive(Debug, Clone, Copy, Default)]
pub struct FileEncoderFactory {
    /// Encoder threads handed to the container backend
    pub threads: u32,
}

impl FileEncoderFactory {
    pub fn new(threads: u32) -> Self {
        Self { threads }
    }
}

impl EncoderFactory for FileEncoderFactory {
    fn open(
        &self,
        path: &Path,
        codec: OutputCodec,
        fps: u32,
        size: (u32, u32),
    ) -> Result<Box<dyn VideoEncoder>, WriterError> {
        debug!(
            "Opening {} encoder for {} ({}x{}@{})",
            codec,
            path.display(),
            size.0,
            size.1,
            fps
        );

        match codec {
            OutputCodec::Yuv420 => Ok(Box::new(Yuv420FileEncoder::create(path)?)),
            OutputCodec::Mjpeg => Ok(Box::new(MjpegFileEncoder::create(path)?)),
            #[cfg(all(feature = "video_encoding", target_os = "linux"))]
            _ => Ok(Box::new(super::GstFileEncoder::create(
                path,
                codec,
                fps,
                size,
                self.threads,
            )?)),
            #[cfg(not(all(feature = "video_encoding", target_os = "linux")))]
            _ => Err(WriterError::CodecUnavailable {
                codec: codec.to_string(),
            }),
        }
    }
}
