use super::stats::StreamStats;
use crate::session::{Delivery, FrameSink};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Pipeline-facing half of a WebSocket viewer.
///
/// Frames go into a bounded backlog drained by the connection task. A full
/// backlog drops the frame; too many drops in a row cancel the connection.
pub struct ViewerConnection {
    endpoint: SocketAddr,
    backlog: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    consecutive_drops: AtomicU32,
    max_drops: u32,
    stats: Arc<StreamStats>,
}

impl ViewerConnection {
    /// Create the sink and the receiving end of its backlog
    pub fn new(
        endpoint: SocketAddr,
        backlog: usize,
        max_drops: u32,
        cancel: CancellationToken,
        stats: Arc<StreamStats>,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        let viewer = Self {
            endpoint,
            backlog: tx,
            cancel,
            consecutive_drops: AtomicU32::new(0),
            max_drops,
            stats,
        };
        (viewer, rx)
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl FrameSink for ViewerConnection {
    fn try_send(&self, frame: Bytes) -> Delivery {
        if self.cancel.is_cancelled() {
            return Delivery::Closed;
        }

        match self.backlog.try_send(frame) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                Delivery::Queued
            }
            Err(TrySendError::Full(_)) => {
                let drops = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if self.max_drops > 0 && drops >= self.max_drops {
                    warn!(
                        "Viewer {} dropped {} frames in a row, disconnecting",
                        self.endpoint, drops
                    );
                    self.stats.slow_disconnects.fetch_add(1, Ordering::Relaxed);
                    self.cancel.cancel();
                    return Delivery::Closed;
                }
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}
