use super::Session;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Live viewer sessions keyed by remote endpoint.
///
/// Shared by the broadcaster (lookups) and the transport layer (insert on
/// accept, remove on teardown); all mutation goes through this type.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SocketAddr, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; false if `endpoint` is already present, in which
    /// case the existing entry is kept.
    pub fn insert(&self, endpoint: SocketAddr, session: Session) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&endpoint) {
            return false;
        }
        sessions.insert(endpoint, session);
        debug!("Registered session {} ({} live)", endpoint, sessions.len());
        true
    }

    /// Unregister a session; false if it was not present
    pub fn remove(&self, endpoint: &SocketAddr) -> bool {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(endpoint).is_some();
        if removed {
            debug!("Unregistered session {} ({} live)", endpoint, sessions.len());
        }
        removed
    }

    pub fn get(&self, endpoint: &SocketAddr) -> Option<Session> {
        self.sessions.read().get(endpoint).cloned()
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.sessions.read().contains_key(endpoint)
    }

    /// Endpoints registered at the time of the call
    pub fn keys(&self) -> Vec<SocketAddr> {
        self.sessions.read().keys().copied().collect()
    }

    /// Apply `f` to a snapshot of the registered endpoints.
    ///
    /// The lock is released before `f` runs, so `f` may insert or remove
    /// sessions.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(SocketAddr),
    {
        for endpoint in self.keys() {
            f(endpoint);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop entries whose connection no longer exists
    pub fn prune(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.is_alive());
        before - sessions.len()
    }

    /// Remove every session and ask the live ones to close.
    ///
    /// Returns the number of connections that were told to close.
    pub fn sweep(&self) -> usize {
        let drained: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let mut closed = 0;
        for session in drained {
            if let Some(sink) = session.sink() {
                sink.close();
                closed += 1;
            }
        }
        if closed > 0 {
            info!("Closed {} viewer sessions", closed);
        }
        closed
    }
}
