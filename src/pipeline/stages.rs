use super::coordinator::Shared;
use super::{PauseOutcome, Stage, StageQueue};
use crate::annotate::Annotator;
use crate::camera::{FrameSource, PixelFormat};
use crate::config::BroadcastTap;
use crate::decode::{encode_jpeg, Decoder, JPEG_QUALITY};
use crate::error::{protocol_violation, DeviceError, WriterError};
use crate::frame::{FrameContext, Packet};
use crate::recording::FileWriter;
use bytes::Bytes;
use chrono::Local;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Runs when a stage loop ends, normally or by panic: hands back a held
/// pause, forwards the quit marker and stops the pipeline if it is still
/// running.
struct WorkerExit<'a> {
    shared: &'a Arc<Shared>,
    stage: Stage,
    downstream: Option<&'a StageQueue>,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if self.shared.pause.pauser() == Some(self.stage) {
            let _ = self.shared.pause.resume(self.stage);
        }
        if let Some(queue) = self.downstream {
            queue.push(Packet::Quit);
        }
        self.shared.worker_exited(self.stage);
    }
}

impl Shared {
    /// Pause upstream production when `depth` reaches the pause threshold;
    /// release a pause held by `stage` once its queue is empty.
    fn apply_backpressure(&self, stage: Stage, depth: usize) {
        if depth >= self.settings.pause_threshold {
            match self.pause.request_pause(stage) {
                PauseOutcome::Paused => {
                    self.stats.pause_episodes.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "{} stage input at {} frames, pausing upstream stages",
                        stage, depth
                    );
                }
                PauseOutcome::HeldBy(holder) => {
                    trace!("{} stage backlog {} while {} holds the pause", stage, depth, holder)
                }
                PauseOutcome::AlreadyPaused | PauseOutcome::Shutdown => {}
            }
        } else if depth == 0 && self.pause.pauser() == Some(stage) {
            match self.pause.resume(stage) {
                Ok(paused_for) => info!("{} stage drained, resumed after {:?}", stage, paused_for),
                Err(e) => protocol_violation(&e.to_string()),
            }
        }
    }

    fn publish(&self, frame: Bytes) {
        if let Some(tap) = &self.tap {
            tap.publish(frame);
        }
    }

    fn tap_wants(&self, point: BroadcastTap) -> bool {
        self.settings.tap == point && self.tap.as_ref().is_some_and(|tap| tap.wants_frames())
    }
}

pub(crate) fn capture_loop(shared: Arc<Shared>, mut source: Box<dyn FrameSource>) {
    let _exit = WorkerExit {
        shared: &shared,
        stage: Stage::Capture,
        downstream: Some(&shared.capture_queue),
    };
    let settings = &shared.settings;
    let stats = &shared.stats;
    let mut sequence: u64 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut dropping = false;

    info!("Capture stage started ({})", source.mode());

    while !shared.stop_requested() {
        if !shared.pause.wait_while_paused(Stage::Capture) {
            break;
        }

        let raw = match source.read() {
            Ok(raw) => {
                consecutive_failures = 0;
                raw
            }
            Err(DeviceError::EndOfStream) => {
                info!("Frame source reached end of stream");
                break;
            }
            Err(e) if e.is_transient() => {
                consecutive_failures += 1;
                stats.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Capture read failed ({}/{}): {}",
                    consecutive_failures, settings.max_consecutive_read_failures, e
                );
                if consecutive_failures >= settings.max_consecutive_read_failures {
                    error!("Too many consecutive read failures, stopping capture");
                    shared.record_failure(Stage::Capture, e.to_string());
                    break;
                }
                continue;
            }
            Err(e) => {
                error!("Capture failed: {}", e);
                shared.record_failure(Stage::Capture, e.to_string());
                break;
            }
        };

        stats.frames_captured.fetch_add(1, Ordering::Relaxed);
        let frame_sequence = sequence;
        sequence += 1;

        // The bytes are shared with the viewers and never mutated again
        if raw.format == PixelFormat::Mjpeg && shared.tap_wants(BroadcastTap::Capture) {
            shared.publish(raw.data.clone());
        }

        let depth = shared.capture_queue.len();
        if depth > settings.pause_threshold {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            if !dropping {
                warn!(
                    "Decode queue over pause threshold ({} frames), dropping captured frames",
                    depth
                );
                dropping = true;
            }
            trace!("Dropped frame {}", frame_sequence);
            continue;
        }
        dropping = false;

        let frame_time = raw.timestamp.unwrap_or_else(Local::now);
        let mut ctx = FrameContext::new(frame_sequence, frame_time, raw);
        ctx.timings.sent = Some(Instant::now());
        shared.capture_queue.push(Packet::Frame(Box::new(ctx)));
    }

    source.close();
    info!("Capture stage finished after {} frames", sequence);
}

pub(crate) fn decode_loop(
    shared: Arc<Shared>,
    mut decoder: Box<dyn Decoder>,
    annotator: Option<Annotator>,
) {
    let _exit = WorkerExit {
        shared: &shared,
        stage: Stage::Decode,
        downstream: Some(&shared.write_queue),
    };
    let settings = &shared.settings;
    let stats = &shared.stats;
    let budget_ms = settings.frame_budget().as_millis() as u64;

    info!("Decode stage started ({} decoder)", decoder.name());

    loop {
        let mut ctx = match shared.capture_queue.pop() {
            Packet::Quit => break,
            Packet::Frame(ctx) => ctx,
        };
        shared.apply_backpressure(Stage::Decode, shared.capture_queue.len());

        let Some(raw) = ctx.raw.take() else {
            continue;
        };
        let mut image = match decoder.decode(&raw) {
            Ok(image) => image,
            Err(e) => {
                stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping frame {}: {}", ctx.sequence, e);
                continue;
            }
        };
        ctx.timings.decoded = Some(Instant::now());

        if let Some(annotator) = &annotator {
            let over_budget = stats.last_frame_cost_ms.load(Ordering::Relaxed) > budget_ms;
            let fps = settings
                .display_fps
                .should_show(over_budget)
                .then(|| stats.measured_fps());
            let text = annotator.overlay_text(&ctx.frame_time, fps);
            annotator.annotate(settings.overlay_position, &text, &mut image);
        }

        if shared.tap_wants(BroadcastTap::Annotated) {
            match encode_jpeg(&image, JPEG_QUALITY) {
                Ok(jpeg) => shared.publish(Bytes::from(jpeg)),
                Err(e) => debug!("Failed to encode frame {} for viewers: {}", ctx.sequence, e),
            }
        }

        ctx.decoded = Some(image);
        ctx.timings.processed = Some(Instant::now());

        // The frame in hand is passed on once the pause is released
        shared.pause.wait_while_paused(Stage::Decode);
        shared.write_queue.push(Packet::Frame(ctx));
    }

    info!("Decode stage finished");
}

pub(crate) fn write_loop(shared: Arc<Shared>, mut writer: FileWriter) {
    let _exit = WorkerExit {
        shared: &shared,
        stage: Stage::Write,
        downstream: None,
    };
    let settings = &shared.settings;
    let stats = &shared.stats;
    let budget = settings.frame_budget();
    let mut last_written: Option<Instant> = None;

    lower_priority();
    info!("Write stage started");

    loop {
        let mut ctx = match shared.write_queue.pop() {
            Packet::Quit => break,
            Packet::Frame(ctx) => ctx,
        };
        shared.apply_backpressure(Stage::Write, shared.write_queue.len());

        let Some(image) = ctx.decoded.take() else {
            continue;
        };

        match writer.write(ctx.frame_time, &image) {
            Ok(()) => {}
            Err(e @ WriterError::Open { .. }) => {
                error!("Cannot open recording file: {}", e);
                shared.record_failure(Stage::Write, e.to_string());
                break;
            }
            Err(e) => {
                stats.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping frame {}: {}", ctx.sequence, e);
                continue;
            }
        }

        let now = Instant::now();
        ctx.timings.written = Some(now);
        stats.frames_written.fetch_add(1, Ordering::Relaxed);
        stats.files_opened.store(writer.files_opened(), Ordering::Relaxed);

        if let Some(previous) = last_written.replace(now) {
            let interval = now.duration_since(previous).as_secs_f64();
            if interval > 0.0 {
                stats
                    .measured_fps_milli
                    .store((1000.0 / interval) as u64, Ordering::Relaxed);
            }
        }

        let total = ctx.timings.total();
        stats
            .last_frame_cost_ms
            .store(total.as_millis() as u64, Ordering::Relaxed);
        if total > budget {
            warn!(
                "Low frame rate: frame {} expected {:?}, took {:?} (decode {:?}, process {:?}, write {:?})",
                ctx.sequence,
                budget,
                total,
                ctx.timings.decode_cost(),
                ctx.timings.process_cost(),
                ctx.timings.write_cost()
            );
        } else {
            trace!("Frame {} written in {:?}", ctx.sequence, total);
        }
    }

    if let Err(e) = writer.close() {
        warn!("Failed to finalize recording: {}", e);
    }
    info!("Write stage finished");
}

/// Lower the scheduling priority of the calling thread
#[cfg(target_os = "linux")]
fn lower_priority() {
    use libc::{setpriority, PRIO_PROCESS};
    // On Linux a zero `who` applies to the calling thread only
    let rc = unsafe { setpriority(PRIO_PROCESS as u32, 0, 10) };
    if rc != 0 {
        debug!(
            "Failed to lower write thread priority: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn lower_priority() {}
