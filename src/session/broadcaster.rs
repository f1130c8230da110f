use super::{Delivery, SessionRegistry};
use crate::pipeline::FrameTap;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Broadcast counters
#[derive(Debug, Default)]
pub struct BroadcastStats {
    pub frames_broadcast: AtomicU64,
    pub deliveries: AtomicU64,
    /// Frames lost to a full viewer backlog
    pub backlog_drops: AtomicU64,
    /// Sessions that vanished between snapshot and delivery
    pub skipped: AtomicU64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            backlog_drops: self.backlog_drops.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastStatsSnapshot {
    pub frames_broadcast: u64,
    pub deliveries: u64,
    pub backlog_drops: u64,
    pub skipped: u64,
}

/// Fans encoded frames out to every registered viewer
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    stats: BroadcastStats,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            stats: BroadcastStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> BroadcastStatsSnapshot {
        self.stats.snapshot()
    }

    /// Hand `frame` to each session in a snapshot of the registry.
    ///
    /// Each viewer gets its own handle on the immutable frame bytes. Returns
    /// the number of viewers that accepted the frame.
    pub fn broadcast(&self, frame: Bytes) -> usize {
        let mut visited = 0;
        let mut delivered = 0;
        self.registry.for_each(|endpoint| {
            visited += 1;
            let Some(sink) = self.registry.get(&endpoint).and_then(|s| s.sink()) else {
                trace!("Session {} went away before delivery", endpoint);
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            };

            match sink.try_send(frame.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::Dropped => {
                    self.stats.backlog_drops.fetch_add(1, Ordering::Relaxed);
                    trace!("Viewer {} backlog full, frame dropped", endpoint);
                }
                Delivery::Closed => {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!("Viewer {} is closing", endpoint);
                }
            }
        });

        if visited > 0 {
            self.stats.frames_broadcast.fetch_add(1, Ordering::Relaxed);
            self.stats
                .deliveries
                .fetch_add(delivered as u64, Ordering::Relaxed);
        }
        delivered
    }
}

impl FrameTap for Broadcaster {
    fn wants_frames(&self) -> bool {
        !self.registry.is_empty()
    }

    fn publish(&self, frame: Bytes) {
        self.broadcast(frame);
    }
}
