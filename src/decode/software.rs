use super::{i420_to_rgb, Decoder};
use crate::camera::PixelFormat;
use crate::error::DecodeError;
use crate::frame::{DecodedImage, RawFrame};
use image::ImageFormat;
use tracing::trace;

/// Pure Rust decoder for MJPG and YUV420 frames
#[derive(Debug, Default)]
pub struct SoftwareDecoder {
    decoded: u64,
}

impl SoftwareDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_jpeg(raw: &RawFrame) -> Result<DecodedImage, DecodeError> {
        let image = image::load_from_memory_with_format(&raw.data, ImageFormat::Jpeg).map_err(
            |e| DecodeError::Corrupt {
                format: raw.format.to_string(),
                details: e.to_string(),
            },
        )?;
        Ok(image.to_rgb8())
    }

    fn decode_i420(raw: &RawFrame) -> Result<DecodedImage, DecodeError> {
        let expected = raw
            .format
            .frame_size(raw.width, raw.height)
            .unwrap_or_default();
        if raw.len() < expected {
            return Err(DecodeError::ShortBuffer {
                expected,
                actual: raw.len(),
            });
        }
        Ok(i420_to_rgb(&raw.data, raw.width, raw.height))
    }
}

impl Decoder for SoftwareDecoder {
    fn name(&self) -> &'static str {
        "software"
    }

    fn decode(&mut self, raw: &RawFrame) -> Result<DecodedImage, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::ShortBuffer {
                expected: 1,
                actual: 0,
            });
        }

        let image = match raw.format {
            PixelFormat::Mjpeg => Self::decode_jpeg(raw)?,
            PixelFormat::Yuv420 => Self::decode_i420(raw)?,
        };

        self.decoded += 1;
        trace!(
            "Decoded {} frame {} ({}x{})",
            raw.format,
            self.decoded,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}
