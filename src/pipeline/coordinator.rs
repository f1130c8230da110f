use super::stages::{capture_loop, decode_loop, write_loop};
use super::{
    FrameTap, PauseState, PipelineSettings, PipelineState, PipelineStats, PipelineStatsSnapshot,
    Stage, StageFactory, StageQueue, StateCell,
};
use crate::annotate::Annotator;
use crate::camera::FrameSource;
use crate::decode::Decoder;
use crate::error::{protocol_violation, PipelineError, Result};
use crate::frame::Packet;
use crate::recording::FileWriter;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

thread_local! {
    static IS_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// State shared between the coordinator handle and the worker threads
pub(crate) struct Shared {
    pub(crate) settings: PipelineSettings,
    /// capture → decode
    pub(crate) capture_queue: StageQueue,
    /// decode → write
    pub(crate) write_queue: StageQueue,
    pub(crate) pause: PauseState,
    pub(crate) stats: PipelineStats,
    pub(crate) tap: Option<Arc<dyn FrameTap>>,
    state: StateCell,
    stop_requested: AtomicBool,
    failure: Mutex<Option<String>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Remember the first fatal stage error of this run
    pub(crate) fn record_failure(&self, stage: Stage, details: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(
                PipelineError::StageFailed {
                    stage: stage.to_string(),
                    details,
                }
                .to_string(),
            );
        }
    }

    fn on_worker_thread(&self) -> bool {
        IS_WORKER.with(Cell::get)
    }

    /// Running → Stopping → Stopped.
    ///
    /// From a worker thread the joins happen on a detached helper thread.
    pub(crate) fn stop(self: &Arc<Self>) {
        if !self
            .state
            .try_transition(PipelineState::Running, PipelineState::Stopping)
        {
            if self.state.get() == PipelineState::Stopping && !self.on_worker_thread() {
                self.state.wait_for(PipelineState::Stopped, None);
            }
            return;
        }

        info!("Stopping pipeline");
        self.stop_requested.store(true, Ordering::Release);
        self.pause.shutdown();

        if !self.on_worker_thread() {
            self.finish_stop();
            return;
        }

        let shared = Arc::clone(self);
        let helper = thread::Builder::new()
            .name("homecam-stop".to_string())
            .spawn(move || shared.finish_stop());
        if let Err(e) = helper {
            error!("Failed to spawn stop helper, detaching workers: {}", e);
            self.workers.lock().clear();
            self.state
                .try_transition(PipelineState::Stopping, PipelineState::Stopped);
        }
    }

    fn finish_stop(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();

        for handle in handles {
            if handle.thread().id() == current {
                protocol_violation("pipeline worker attempted to join itself");
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("Pipeline thread {} panicked", name);
            } else {
                debug!("Joined {}", name);
            }
        }

        debug!(
            "Peak queue depths: decode input {}, write input {}",
            self.capture_queue.peak(),
            self.write_queue.peak()
        );
        let leftover = self.capture_queue.clear() + self.write_queue.clear();
        if leftover > 0 {
            debug!("Discarded {} queued packets after stop", leftover);
        }

        self.state
            .try_transition(PipelineState::Stopping, PipelineState::Stopped);

        let stats = self.stats.snapshot();
        info!(
            "Pipeline stopped: {} captured, {} written, {} dropped, {} decode failures, {} write failures",
            stats.frames_captured,
            stats.frames_written,
            stats.frames_dropped,
            stats.decode_failures,
            stats.write_failures
        );
    }

    /// Called by each worker as it exits
    pub(crate) fn worker_exited(self: &Arc<Self>, stage: Stage) {
        debug!("{} stage exited", stage);
        if self.state.get() == PipelineState::Running {
            self.stop();
        }
    }
}

/// Owns the inter-stage queues and the three worker threads.
///
/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct PipelineCoordinator {
    shared: Arc<Shared>,
    factory: Arc<dyn StageFactory>,
}

impl PipelineCoordinator {
    pub fn new(
        settings: PipelineSettings,
        factory: Arc<dyn StageFactory>,
        tap: Option<Arc<dyn FrameTap>>,
    ) -> Self {
        let shared = Shared {
            capture_queue: StageQueue::new("decode input", settings.warn_threshold),
            write_queue: StageQueue::new("write input", settings.warn_threshold),
            settings,
            pause: PauseState::new(),
            stats: PipelineStats::new(),
            tap,
            state: StateCell::new(),
            stop_requested: AtomicBool::new(false),
            failure: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        };

        Self {
            shared: Arc::new(shared),
            factory,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn pauser(&self) -> Option<Stage> {
        self.shared.pause.pauser()
    }

    /// Fatal error that stopped the last run, if any
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    /// Open the stage components and start the capture, decode and write
    /// threads.
    ///
    /// Fails with `AlreadyRunning` unless the pipeline is stopped, and with
    /// the component error when a source, decoder, font or writer cannot be
    /// opened.
    pub fn run(&self) -> Result<()> {
        let shared = &self.shared;
        if !shared
            .state
            .try_transition(PipelineState::Stopped, PipelineState::Running)
        {
            return Err(PipelineError::AlreadyRunning.into());
        }

        shared.stop_requested.store(false, Ordering::Release);
        shared.pause.reset();
        shared.capture_queue.clear();
        shared.write_queue.clear();
        shared.stats.reset();
        *shared.failure.lock() = None;

        let (source, decoder, annotator, writer) = match self.open_components() {
            Ok(components) => components,
            Err(e) => {
                error!("Pipeline failed to start: {}", e);
                shared
                    .state
                    .try_transition(PipelineState::Running, PipelineState::Stopped);
                return Err(e);
            }
        };

        info!(
            "Starting pipeline ({} fps, warn at {}, pause at {})",
            shared.settings.fps, shared.settings.warn_threshold, shared.settings.pause_threshold
        );

        // Held until every handle is stored so an early-exiting worker
        // cannot finish a stop before the others are joinable.
        let mut workers = shared.workers.lock();
        let spawned = spawn_worker(&mut workers, shared, Stage::Write, move |s| {
            write_loop(s, writer)
        })
        .and_then(|_| {
            spawn_worker(&mut workers, shared, Stage::Decode, move |s| {
                decode_loop(s, decoder, annotator)
            })
        })
        .and_then(|_| {
            spawn_worker(&mut workers, shared, Stage::Capture, move |s| {
                capture_loop(s, source)
            })
        });
        let started = workers.len();
        drop(workers);

        if let Err(e) = spawned {
            error!("Pipeline failed to start: {}", e);
            shared.stop_requested.store(true, Ordering::Release);
            shared.pause.shutdown();
            // Started workers wait for a quit marker that capture never sends
            match started {
                1 => shared.write_queue.push(Packet::Quit),
                _ => shared.capture_queue.push(Packet::Quit),
            };
            if shared
                .state
                .try_transition(PipelineState::Running, PipelineState::Stopping)
            {
                shared.finish_stop();
            } else {
                shared.state.wait_for(PipelineState::Stopped, None);
            }
            return Err(e.into());
        }

        Ok(())
    }

    fn open_components(
        &self,
    ) -> Result<(
        Box<dyn FrameSource>,
        Box<dyn Decoder>,
        Option<Annotator>,
        FileWriter,
    )> {
        Ok((
            self.factory.open_source()?,
            self.factory.build_decoder()?,
            self.factory.open_annotator()?,
            self.factory.open_writer()?,
        ))
    }

    /// Stop the pipeline and join its threads.
    ///
    /// Safe to call from any thread, including a pipeline worker, in which
    /// case the join is left to a helper thread. A no-op unless running.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Block until the pipeline is stopped; false on timeout
    pub fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        self.shared.state.wait_for(PipelineState::Stopped, timeout)
    }
}

fn spawn_worker<F>(
    workers: &mut Vec<JoinHandle<()>>,
    shared: &Arc<Shared>,
    stage: Stage,
    body: F,
) -> std::result::Result<(), PipelineError>
where
    F: FnOnce(Arc<Shared>) + Send + 'static,
{
    let worker_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("homecam-{}", stage))
        .spawn(move || {
            IS_WORKER.with(|flag| flag.set(true));
            body(worker_shared)
        })
        .map_err(|source| PipelineError::Spawn {
            stage: stage.to_string(),
            source,
        })?;

    debug!("Spawned {} thread", stage);
    workers.push(handle);
    Ok(())
}
