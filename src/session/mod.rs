mod broadcaster;
mod registry;
#[cfg(test)]
mod tests;

pub use broadcaster::{BroadcastStats, BroadcastStatsSnapshot, Broadcaster};
pub use registry::SessionRegistry;

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Transport a viewer is connected over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Plain => write!(f, "plain"),
            TransportKind::Tls => write!(f, "tls"),
        }
    }
}

/// Outcome of handing one frame to a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted into the viewer's backlog
    Queued,
    /// Backlog full; this frame is lost for this viewer only
    Dropped,
    /// The viewer is gone or being torn down
    Closed,
}

/// Outgoing path of one live viewer, implemented by the transport layer.
///
/// `try_send` is called from the pipeline thread and must never block.
pub trait FrameSink: Send + Sync {
    fn try_send(&self, frame: Bytes) -> Delivery;

    /// Ask the connection to shut down
    fn close(&self);
}

/// Registry entry for a connected viewer.
///
/// Holds only a weak reference to the sink; the connection itself is owned
/// by the transport task serving it.
#[derive(Clone)]
pub struct Session {
    endpoint: SocketAddr,
    transport: TransportKind,
    sink: Weak<dyn FrameSink>,
    connected_at: Instant,
}

impl Session {
    pub fn new(endpoint: SocketAddr, transport: TransportKind, sink: &Arc<dyn FrameSink>) -> Self {
        Self {
            endpoint,
            transport,
            sink: Arc::downgrade(sink),
            connected_at: Instant::now(),
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// The live sink, or `None` once the connection has been dropped
    pub fn sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.sink.strong_count() > 0
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport)
            .field("alive", &self.is_alive())
            .finish()
    }
}
