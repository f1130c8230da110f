use crate::error::PipelineError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Pipeline stages in data-flow order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Capture,
    Decode,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Capture => write!(f, "capture"),
            Stage::Decode => write!(f, "decode"),
            Stage::Write => write!(f, "write"),
        }
    }
}

/// Result of a pause request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// The caller is now the pauser
    Paused,
    /// The caller already holds the pause
    AlreadyPaused,
    /// Another stage holds the pause
    HeldBy(Stage),
    /// The pipeline is shutting down
    Shutdown,
}

struct PauseInner {
    pauser: Option<Stage>,
    since: Option<Instant>,
    shutdown: bool,
}

/// Cooperative throttling shared by the three stages.
///
/// One stage at a time may hold the pause. While it is held, every stage
/// upstream of the pauser blocks in `wait_while_paused` before producing its
/// next frame; the pauser and stages downstream of it keep draining.
pub struct PauseState {
    inner: Mutex<PauseInner>,
    released: Condvar,
}

impl PauseState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PauseInner {
                pauser: None,
                since: None,
                shutdown: false,
            }),
            released: Condvar::new(),
        }
    }

    pub fn request_pause(&self, stage: Stage) -> PauseOutcome {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return PauseOutcome::Shutdown;
        }
        match inner.pauser {
            Some(holder) if holder == stage => PauseOutcome::AlreadyPaused,
            Some(holder) => PauseOutcome::HeldBy(holder),
            None => {
                inner.pauser = Some(stage);
                inner.since = Some(Instant::now());
                PauseOutcome::Paused
            }
        }
    }

    /// Release a pause held by `stage` and wake the paused stages.
    ///
    /// Returns how long the pause lasted. Releasing a pause held by another
    /// stage, or none at all, is a protocol violation.
    pub fn resume(&self, stage: Stage) -> Result<Duration, PipelineError> {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Ok(Duration::ZERO);
        }
        if inner.pauser != Some(stage) {
            return Err(PipelineError::ProtocolViolation {
                details: format!(
                    "{} stage resumed a pause held by {}",
                    stage,
                    inner
                        .pauser
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "nobody".to_string())
                ),
            });
        }

        let paused_for = inner.since.take().map(|t| t.elapsed()).unwrap_or_default();
        inner.pauser = None;
        self.released.notify_all();
        Ok(paused_for)
    }

    pub fn pauser(&self) -> Option<Stage> {
        self.inner.lock().pauser
    }

    pub fn is_paused(&self) -> bool {
        self.pauser().is_some()
    }

    /// Block while a stage downstream of `stage` holds the pause.
    ///
    /// Returns false once shutdown has been signalled.
    pub fn wait_while_paused(&self, stage: Stage) -> bool {
        let mut inner = self.inner.lock();
        let mut logged = false;
        while !inner.shutdown && matches!(inner.pauser, Some(holder) if holder > stage) {
            if !logged {
                trace!("{} stage waiting for pause release", stage);
                logged = true;
            }
            self.released.wait(&mut inner);
        }
        !inner.shutdown
    }

    /// Clear any pause and wake all waiters for shutdown
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.pauser = None;
        inner.since = None;
        self.released.notify_all();
    }

    /// Re-arm for a new run
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = false;
        inner.pauser = None;
        inner.since = None;
    }
}

impl Default for PauseState {
    fn default() -> Self {
        Self::new()
    }
}
