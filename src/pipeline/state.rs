use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle of the pipeline coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Running,
            2 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Pipeline state that only changes through checked transitions
pub struct StateCell {
    value: AtomicU8,
    lock: Mutex<()>,
    changed: Condvar,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(PipelineState::Stopped as u8),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if the state was not `from`
    pub fn try_transition(&self, from: PipelineState, to: PipelineState) -> bool {
        let _guard = self.lock.lock();
        let swapped = self
            .value
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.changed.notify_all();
        }
        swapped
    }

    /// Block until the state is `target`; false on timeout
    pub fn wait_for(&self, target: PipelineState, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock();
        while self.get() != target {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut guard, deadline).timed_out() {
                        return self.get() == target;
                    }
                }
                None => self.changed.wait(&mut guard),
            }
        }
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transitions_are_checked() {
        let state = StateCell::new();
        assert_eq!(state.get(), PipelineState::Stopped);

        assert!(!state.try_transition(PipelineState::Running, PipelineState::Stopping));
        assert!(state.try_transition(PipelineState::Stopped, PipelineState::Running));
        assert!(!state.try_transition(PipelineState::Stopped, PipelineState::Running));
        assert_eq!(state.get(), PipelineState::Running);
    }

    #[test]
    fn test_wait_for_wakes_on_transition() {
        let state = Arc::new(StateCell::new());
        assert!(state.try_transition(PipelineState::Stopped, PipelineState::Running));

        let waiter = {
            let state = state.clone();
            std::thread::spawn(move || state.wait_for(PipelineState::Stopped, None))
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(state.try_transition(PipelineState::Running, PipelineState::Stopped));
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_for_times_out() {
        let state = StateCell::new();
        assert!(state.try_transition(PipelineState::Stopped, PipelineState::Running));
        assert!(!state.wait_for(PipelineState::Stopped, Some(Duration::from_millis(20))));
    }
}
