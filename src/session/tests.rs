use super::*;
use crate::pipeline::FrameTap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

fn endpoint(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<Bytes>>,
    full: AtomicBool,
    closed: AtomicBool,
    /// Removed from the registry when this sink receives a frame
    evict: Mutex<Option<(Arc<SessionRegistry>, SocketAddr)>>,
    /// Registers a new viewer on this port when this sink receives a frame
    admit: Mutex<Option<(Arc<SessionRegistry>, u16)>>,
    admitted: Mutex<Vec<(Arc<RecordingSink>, Arc<dyn FrameSink>)>>,
}

impl FrameSink for RecordingSink {
    fn try_send(&self, frame: Bytes) -> Delivery {
        if let Some((registry, endpoint)) = self.evict.lock().take() {
            registry.remove(&endpoint);
        }
        if let Some((registry, port)) = self.admit.lock().take() {
            self.admitted.lock().push(register(&registry, port));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Delivery::Closed;
        }
        if self.full.load(Ordering::SeqCst) {
            return Delivery::Dropped;
        }
        self.frames.lock().push(frame);
        Delivery::Queued
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn register(registry: &SessionRegistry, port: u16) -> (Arc<RecordingSink>, Arc<dyn FrameSink>) {
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn FrameSink> = sink.clone();
    assert!(registry.insert(
        endpoint(port),
        Session::new(endpoint(port), TransportKind::Plain, &dyn_sink)
    ));
    (sink, dyn_sink)
}

#[test]
fn test_insert_then_remove() {
    let registry = SessionRegistry::new();
    let sink: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());

    let inserted = registry.insert(
        endpoint(5000),
        Session::new(endpoint(5000), TransportKind::Plain, &sink),
    );
    let removed = registry.remove(&endpoint(5000));

    assert_eq!((inserted, removed), (true, true));
    assert!(registry.is_empty());
}

#[test]
fn test_remove_unknown_endpoint() {
    let registry = SessionRegistry::new();
    assert!(!registry.remove(&endpoint(5001)));
}

#[test]
fn test_duplicate_insert_keeps_original() {
    let registry = SessionRegistry::new();
    let first: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());
    let second: Arc<dyn FrameSink> = Arc::new(RecordingSink::default());

    assert!(registry.insert(
        endpoint(5002),
        Session::new(endpoint(5002), TransportKind::Plain, &first)
    ));
    assert!(!registry.insert(
        endpoint(5002),
        Session::new(endpoint(5002), TransportKind::Tls, &second)
    ));

    let session = registry.get(&endpoint(5002)).unwrap();
    assert_eq!(session.transport(), TransportKind::Plain);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_for_each_tolerates_mutation() {
    let registry = SessionRegistry::new();
    let _keep: Vec<_> = (0..4).map(|i| register(&registry, 6000 + i)).collect();

    let mut visited = Vec::new();
    registry.for_each(|endpoint| {
        registry.remove(&endpoint);
        visited.push(endpoint);
    });

    assert_eq!(visited.len(), 4);
    assert!(registry.is_empty());
}

#[test]
fn test_broadcast_without_sessions() {
    let registry = Arc::new(SessionRegistry::new());
    let broadcaster = Broadcaster::new(registry);

    assert!(!broadcaster.wants_frames());
    assert_eq!(broadcaster.broadcast(Bytes::from_static(b"frame")), 0);
    assert_eq!(broadcaster.stats().frames_broadcast, 0);
}

#[test]
fn test_broadcast_skips_session_removed_mid_broadcast() {
    let registry = Arc::new(SessionRegistry::new());
    let sessions: Vec<_> = (0..3)
        .map(|i| (endpoint(7000 + i), register(&registry, 7000 + i)))
        .collect();

    // The first sink reached evicts the last endpoint of the snapshot, so
    // exactly one session disappears after the snapshot was taken
    let order = registry.keys();
    let (_, (first_sink, _)) = sessions
        .iter()
        .find(|(endpoint, _)| *endpoint == order[0])
        .unwrap();
    *first_sink.evict.lock() = Some((registry.clone(), order[2]));

    let broadcaster = Broadcaster::new(registry.clone());
    let delivered = broadcaster.broadcast(Bytes::from_static(b"jpeg"));

    assert_eq!(delivered, 2);
    let stats = broadcaster.stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.deliveries, 2);
    let received: usize = sessions
        .iter()
        .map(|(_, (sink, _))| sink.frames.lock().len())
        .sum();
    assert_eq!(received, 2);
}

#[test]
fn test_viewer_joining_mid_broadcast_waits_for_next_frame() {
    let registry = Arc::new(SessionRegistry::new());
    let (first, _first_handle) = register(&registry, 7050);
    *first.admit.lock() = Some((registry.clone(), 7051));

    let broadcaster = Broadcaster::new(registry.clone());
    assert_eq!(broadcaster.broadcast(Bytes::from_static(b"one")), 1);
    assert_eq!(registry.len(), 2);

    let admitted = first.admitted.lock();
    let (newcomer, _) = &admitted[0];
    assert!(newcomer.frames.lock().is_empty());
    drop(admitted);

    assert_eq!(broadcaster.broadcast(Bytes::from_static(b"two")), 2);
    let admitted = first.admitted.lock();
    assert_eq!(*admitted[0].0.frames.lock(), vec![Bytes::from_static(b"two")]);
    assert_eq!(broadcaster.stats().frames_broadcast, 2);
}

#[test]
fn test_full_backlog_only_affects_that_viewer() {
    let registry = Arc::new(SessionRegistry::new());
    let (slow, _slow_handle) = register(&registry, 7100);
    let (fast, _fast_handle) = register(&registry, 7101);
    slow.full.store(true, Ordering::SeqCst);

    let broadcaster = Broadcaster::new(registry);
    for i in 0..3u8 {
        broadcaster.publish(Bytes::from(vec![i]));
    }

    assert!(slow.frames.lock().is_empty());
    let frames = fast.frames.lock();
    assert_eq!(
        frames.iter().map(|f| f[0]).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(broadcaster.stats().backlog_drops, 3);
}

#[test]
fn test_dropped_connection_is_skipped_and_pruned() {
    let registry = Arc::new(SessionRegistry::new());
    let (_live, _live_handle) = register(&registry, 7200);
    {
        let (_gone, _gone_handle) = register(&registry, 7201);
    }

    let broadcaster = Broadcaster::new(registry.clone());
    assert_eq!(broadcaster.broadcast(Bytes::from_static(b"x")), 1);
    assert_eq!(broadcaster.stats().skipped, 1);

    assert_eq!(registry.prune(), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_sweep_closes_live_sessions() {
    let registry = SessionRegistry::new();
    let (a, _a_handle) = register(&registry, 7300);
    let (b, _b_handle) = register(&registry, 7301);

    assert_eq!(registry.sweep(), 2);
    assert!(registry.is_empty());
    assert!(a.closed.load(Ordering::SeqCst));
    assert!(b.closed.load(Ordering::SeqCst));
}
