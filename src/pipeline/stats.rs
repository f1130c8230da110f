use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the pipeline stages
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    /// Frames discarded because the decode queue was over the pause threshold
    pub frames_dropped: AtomicU64,
    pub read_failures: AtomicU64,
    pub decode_failures: AtomicU64,
    pub write_failures: AtomicU64,
    pub frames_written: AtomicU64,
    pub files_opened: AtomicU64,
    pub pause_episodes: AtomicU64,
    /// End-to-end cost of the last written frame
    pub last_frame_cost_ms: AtomicU64,
    /// Measured output rate in millihertz
    pub measured_fps_milli: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measured_fps(&self) -> f64 {
        self.measured_fps_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            files_opened: self.files_opened.load(Ordering::Relaxed),
            pause_episodes: self.pause_episodes.load(Ordering::Relaxed),
            last_frame_cost_ms: self.last_frame_cost_ms.load(Ordering::Relaxed),
            measured_fps: self.measured_fps(),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.frames_captured,
            &self.frames_dropped,
            &self.read_failures,
            &self.decode_failures,
            &self.write_failures,
            &self.frames_written,
            &self.files_opened,
            &self.pause_episodes,
            &self.last_frame_cost_ms,
            &self.measured_fps_milli,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStatsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub decode_failures: u64,
    pub write_failures: u64,
    pub frames_written: u64,
    pub files_opened: u64,
    pub pause_episodes: u64,
    pub last_frame_cost_ms: u64,
    pub measured_fps: f64,
}
