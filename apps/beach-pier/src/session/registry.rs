use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ClientSession, SessionConfig, SessionSnapshot, SessionState};
use crate::protocol::ServerMessage;
use crate::rpc::Dialer;

/// Every live browser connection, keyed by session id.
///
/// The lock is only held to insert, remove or clone out entries; callers
/// never hold it across an RPC or transport await.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

struct SessionRegistryInner {
    sessions: RwLock<HashMap<Uuid, Arc<ClientSession>>>,
    config: SessionConfig,
}

pub struct SessionRegistration {
    pub session: Arc<ClientSession>,
    /// Drained by the transport writer task.
    pub receiver: mpsc::Receiver<ServerMessage>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_clients: usize,
    pub active_clients: usize,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionRegistryInner {
                sessions: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn register(&self, dialer: Arc<dyn Dialer>) -> SessionRegistration {
        let (tx, rx) = mpsc::channel(self.inner.config.outbound_buffer);
        let session = Arc::new(ClientSession::new(
            Uuid::new_v4(),
            tx,
            dialer,
            self.clone(),
            self.inner.config.clone(),
        ));

        let total = {
            let mut sessions = self.inner.sessions.write();
            sessions.insert(session.id(), Arc::clone(&session));
            sessions.len()
        };
        counter!("beach_pier_sessions_opened_total", 1);
        gauge!("beach_pier_registered_sessions", total as f64);

        SessionRegistration {
            session,
            receiver: rx,
        }
    }

    /// Returns whether the session was still registered.
    pub fn unregister(&self, id: Uuid) -> bool {
        let (removed, total) = {
            let mut sessions = self.inner.sessions.write();
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.len())
        };
        if removed {
            gauge!("beach_pier_registered_sessions", total as f64);
        }
        removed
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ClientSession>> {
        self.inner.sessions.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` for each session currently in the `Active` state. The
    /// sessions are cloned out first so `f` runs without the registry lock.
    pub fn for_each_active<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<ClientSession>),
    {
        for session in self.sessions() {
            if session.state() == SessionState::Active {
                f(&session);
            }
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let mut active_clients = 0;
        self.for_each_active(|_| active_clients += 1);
        RegistryStats {
            total_clients: self.len(),
            active_clients,
        }
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut entries: Vec<_> = self
            .sessions()
            .iter()
            .map(|session| session.snapshot())
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.inner.sessions.read().values().cloned().collect()
    }
}
