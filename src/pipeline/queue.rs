use crate::frame::Packet;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
#[cfg(test)]
use std::time::Duration;
use tracing::{debug, warn};

struct QueueInner {
    items: VecDeque<Packet>,
    /// Depth is at or above the warning threshold
    warned: bool,
    peak: usize,
}

/// FIFO between two adjacent pipeline stages.
///
/// Depth is not capped here; producers consult `len()` against the pause
/// threshold before pushing.
pub struct StageQueue {
    name: &'static str,
    warn_threshold: usize,
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl StageQueue {
    pub fn new(name: &'static str, warn_threshold: usize) -> Self {
        Self {
            name,
            warn_threshold,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                warned: false,
                peak: 0,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a packet and return the depth after the push
    pub fn push(&self, packet: Packet) -> usize {
        let mut inner = self.inner.lock();
        inner.items.push_back(packet);
        let depth = inner.items.len();
        inner.peak = inner.peak.max(depth);

        if depth >= self.warn_threshold && !inner.warned {
            inner.warned = true;
            warn!("{} queue depth reached {} frames", self.name, depth);
        }

        self.ready.notify_one();
        depth
    }

    /// Remove the oldest packet, blocking until one is available
    pub fn pop(&self) -> Packet {
        let mut inner = self.inner.lock();
        loop {
            if let Some(packet) = inner.items.pop_front() {
                self.after_pop(&mut inner);
                return packet;
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Like `pop`, giving up after `timeout`
    #[cfg(test)]
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            let _ = self.ready.wait_for(&mut inner, timeout);
        }
        let packet = inner.items.pop_front()?;
        self.after_pop(&mut inner);
        Some(packet)
    }

    fn after_pop(&self, inner: &mut QueueInner) {
        if inner.warned && inner.items.len() < self.warn_threshold {
            inner.warned = false;
            debug!(
                "{} queue depth back to {} frames",
                self.name,
                inner.items.len()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest depth seen since the last `clear`
    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }

    /// Drop everything queued and return how many packets were removed
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.items.len();
        inner.items.clear();
        inner.warned = false;
        inner.peak = 0;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PixelFormat;
    use crate::frame::{FrameContext, RawFrame};
    use chrono::Local;
    use std::sync::Arc;

    fn frame(sequence: u64) -> Packet {
        let raw = RawFrame::new(vec![0u8; 4], 2, 2, PixelFormat::Mjpeg);
        Packet::Frame(Box::new(FrameContext::new(sequence, Local::now(), raw)))
    }

    fn sequence(packet: Packet) -> Option<u64> {
        match packet {
            Packet::Frame(ctx) => Some(ctx.sequence),
            Packet::Quit => None,
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = StageQueue::new("test", 10);
        for n in 0..5 {
            queue.push(frame(n));
        }
        queue.push(Packet::Quit);

        let order: Vec<_> = (0..6).map(|_| sequence(queue.pop())).collect();
        assert_eq!(order, vec![Some(0), Some(1), Some(2), Some(3), Some(4), None]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(StageQueue::new("test", 10));

        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || sequence(queue.pop()))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.push(frame(42));
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let queue = StageQueue::new("test", 10);
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_peak_and_clear() {
        let queue = StageQueue::new("test", 2);
        assert_eq!(queue.push(frame(0)), 1);
        assert_eq!(queue.push(frame(1)), 2);
        assert_eq!(queue.push(frame(2)), 3);
        queue.pop();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peak(), 3);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.peak(), 0);
    }
}
