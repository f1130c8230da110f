mod coordinator;
mod pause;
mod queue;
mod stages;
mod state;
mod stats;

pub use coordinator::PipelineCoordinator;
pub use pause::{PauseOutcome, PauseState, Stage};
pub use queue::StageQueue;
pub use state::{PipelineState, StateCell};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

use crate::annotate::{Annotator, FpsDisplay, Position};
use crate::camera::{self, FrameSource};
use crate::config::{BroadcastTap, HomecamConfig};
use crate::decode::{self, Decoder};
use crate::error::Result;
use crate::recording::{FileEncoderFactory, FileWriter, WriterSettings};
use bytes::Bytes;
use std::time::Duration;

/// Receiver of the encoded frames tapped off the pipeline
pub trait FrameTap: Send + Sync {
    /// Skip tapping (and re-encoding) while nobody is listening
    fn wants_frames(&self) -> bool {
        true
    }

    /// Hand over one JPEG frame; must not block
    fn publish(&self, frame: Bytes);
}

/// Runtime parameters of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fps: u32,
    pub warn_threshold: usize,
    pub pause_threshold: usize,
    pub max_consecutive_read_failures: u32,
    pub tap: BroadcastTap,
    pub overlay_position: Position,
    pub display_fps: FpsDisplay,
}

impl PipelineSettings {
    pub fn from_config(config: &HomecamConfig) -> Self {
        Self {
            fps: config.camera.fps,
            warn_threshold: config.pipeline.warn_threshold,
            pause_threshold: config.pipeline.pause_threshold,
            max_consecutive_read_failures: config.pipeline.max_consecutive_read_failures,
            tap: config.stream.tap,
            overlay_position: config.overlay.position,
            display_fps: config.overlay.display_fps,
        }
    }

    /// Time one frame may take end to end at the configured rate
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }
}

/// Opens the per-run stage components.
///
/// Every method is called once per `run()`, before any worker starts; an
/// error here means the pipeline never starts.
pub trait StageFactory: Send + Sync {
    fn open_source(&self) -> Result<Box<dyn FrameSource>>;

    fn build_decoder(&self) -> Result<Box<dyn Decoder>>;

    /// `None` disables the overlay
    fn open_annotator(&self) -> Result<Option<Annotator>>;

    fn open_writer(&self) -> Result<FileWriter>;
}

/// Stage components built from the application configuration
pub struct ConfiguredStages {
    config: HomecamConfig,
}

impl ConfiguredStages {
    pub fn new(config: HomecamConfig) -> Self {
        Self { config }
    }
}

impl StageFactory for ConfiguredStages {
    fn open_source(&self) -> Result<Box<dyn FrameSource>> {
        Ok(camera::open_source(&self.config.camera)?)
    }

    fn build_decoder(&self) -> Result<Box<dyn Decoder>> {
        Ok(decode::build_decoder(self.config.camera.decoder)?)
    }

    fn open_annotator(&self) -> Result<Option<Annotator>> {
        let overlay = &self.config.overlay;
        if !overlay.enabled {
            return Ok(None);
        }
        let annotator = Annotator::open(&overlay.font_path, overlay.font_size, &overlay.timezone)?;
        Ok(Some(annotator))
    }

    fn open_writer(&self) -> Result<FileWriter> {
        let recording = &self.config.recording;
        let settings = WriterSettings {
            save_directory: recording.save_directory.clone(),
            codec: recording.output_codec,
            fps: self.config.camera.fps,
            duration: Duration::from_secs(recording.duration_seconds as u64),
            write_index: recording.write_index,
        };
        let factory = FileEncoderFactory::new(recording.video_threads);
        Ok(FileWriter::new(settings, Box::new(factory))?)
    }
}
