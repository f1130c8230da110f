mod encoders;
mod gst;
mod index;
mod writer;
#[cfg(test)]
mod tests;

pub use encoders::{FileEncoderFactory, MjpegFileEncoder, Yuv420FileEncoder};
#[cfg(all(feature = "video_encoding", target_os = "linux"))]
pub use gst::GstFileEncoder;
pub use index::{RecordingEntry, RecordingIndex, INDEX_FILE_NAME};
pub use writer::{FileWriter, WriterSettings, WRITER_OPEN_ATTEMPTS, WRITER_RETRY_DELAY};

use crate::error::WriterError;
use crate::frame::DecodedImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Codec of the recorded video files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputCodec {
    /// Concatenated JPEG stream
    Mjpeg,
    /// Raw planar I420
    Yuv420,
    H264,
    H265,
    Mpeg2,
    Mpeg4,
    /// Uncompressed video in a container
    Raw,
}

impl OutputCodec {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputCodec::Mjpeg => "mjpeg",
            OutputCodec::Yuv420 => "yuv",
            OutputCodec::H264
            | OutputCodec::H265
            | OutputCodec::Mpeg2
            | OutputCodec::Mpeg4
            | OutputCodec::Raw => "mov",
        }
    }

    /// Codecs written without GStreamer
    pub fn is_builtin(&self) -> bool {
        matches!(self, OutputCodec::Mjpeg | OutputCodec::Yuv420)
    }

    /// Check if the codec can be written by this build
    pub fn is_available(&self) -> bool {
        self.is_builtin() || cfg!(all(feature = "video_encoding", target_os = "linux"))
    }
}

impl fmt::Display for OutputCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputCodec::Mjpeg => "MJPG",
            OutputCodec::Yuv420 => "YUV420",
            OutputCodec::H264 => "H264",
            OutputCodec::H265 => "H265",
            OutputCodec::Mpeg2 => "MPEG2",
            OutputCodec::Mpeg4 => "MPEG4",
            OutputCodec::Raw => "RAW",
        };
        write!(f, "{}", name)
    }
}

impl TryFrom<String> for OutputCodec {
    type Error = WriterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "MJPG" | "MJPEG" => Ok(OutputCodec::Mjpeg),
            "YUV" | "YUV420" | "I420" => Ok(OutputCodec::Yuv420),
            "H264" | "AVC" => Ok(OutputCodec::H264),
            "H265" | "HEVC" => Ok(OutputCodec::H265),
            "MPEG2" => Ok(OutputCodec::Mpeg2),
            "MPEG4" => Ok(OutputCodec::Mpeg4),
            "RAW" => Ok(OutputCodec::Raw),
            _ => Err(WriterError::CodecUnavailable { codec: value }),
        }
    }
}

impl From<OutputCodec> for String {
    fn from(codec: OutputCodec) -> Self {
        codec.to_string()
    }
}

/// Sink for the frames of one video file
pub trait VideoEncoder: Send {
    fn write_frame(&mut self, image: &DecodedImage) -> Result<(), WriterError>;

    /// Flush and close the file
    fn finish(self: Box<Self>) -> Result<(), WriterError>;
}

/// Opens video files for the writer
pub trait EncoderFactory: Send {
    fn open(
        &self,
        path: &Path,
        codec: OutputCodec,
        fps: u32,
        size: (u32, u32),
    ) -> Result<Box<dyn VideoEncoder>, WriterError>;
}
