use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stream server statistics
#[derive(Debug, Default)]
pub struct StreamStats {
    pub active_viewers: AtomicU64,
    pub total_connections: AtomicU64,
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    /// Viewers disconnected for falling too far behind
    pub slow_disconnects: AtomicU64,
    pub errors: AtomicU64,
}

impl StreamStats {
    pub(crate) fn viewer_connected(&self) {
        self.active_viewers.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn viewer_disconnected(&self) {
        self.active_viewers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_sent(&self, len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            active_viewers: self.active_viewers.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            slow_disconnects: self.slow_disconnects.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamStatsSnapshot {
    pub active_viewers: u64,
    pub total_connections: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub slow_disconnects: u64,
    pub errors: u64,
}
