mod convert;
mod hardware;
mod software;
#[cfg(test)]
mod tests;

pub use convert::{encode_jpeg, i420_to_rgb, rgb_to_i420, JPEG_QUALITY};
#[cfg(all(feature = "hw_decode", target_os = "linux"))]
pub use hardware::GstJpegDecoder;
pub use software::SoftwareDecoder;

use crate::error::DecodeError;
use crate::frame::{DecodedImage, RawFrame};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Converts a captured buffer into an RGB image.
///
/// A failed decode only costs the frame it was given; implementations must
/// stay usable afterwards.
pub trait Decoder: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn decode(&mut self, raw: &RawFrame) -> Result<DecodedImage, DecodeError>;
}

/// Decoder backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    Software,
    /// GStreamer `v4l2jpegdec` (MJPG only)
    Hardware,
}

impl DecoderKind {
    /// Check if the backend was compiled in
    pub fn is_available(&self) -> bool {
        match self {
            DecoderKind::Software => true,
            DecoderKind::Hardware => cfg!(all(feature = "hw_decode", target_os = "linux")),
        }
    }
}

/// Create the decoder selected by `kind`
pub fn build_decoder(kind: DecoderKind) -> Result<Box<dyn Decoder>, DecodeError> {
    let decoder: Box<dyn Decoder> = match kind {
        DecoderKind::Software => Box::new(SoftwareDecoder::new()),
        #[cfg(all(feature = "hw_decode", target_os = "linux"))]
        DecoderKind::Hardware => Box::new(GstJpegDecoder::new()?),
        #[cfg(not(all(feature = "hw_decode", target_os = "linux")))]
        DecoderKind::Hardware => {
            return Err(DecodeError::Backend {
                details: "hardware decoding requires the hw_decode feature".to_string(),
            })
        }
    };

    info!("Using {} decoder", decoder.name());
    Ok(decoder)
}
