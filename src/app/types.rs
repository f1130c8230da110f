use std::fmt;

/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the application is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    /// The supervisor sent EXIT
    ControlExit,
    /// The supervisor's control channel went away
    ControlLost,
    /// The pipeline stopped without being asked to
    PipelineStopped,
    Error(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::ControlExit => write!(f, "exit requested by supervisor"),
            ShutdownReason::ControlLost => write!(f, "control channel lost"),
            ShutdownReason::PipelineStopped => write!(f, "pipeline stopped"),
            ShutdownReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}
