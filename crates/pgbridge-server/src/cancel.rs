//! Side-channel cancellation: a CancelRequest arrives on its own connection
//! carrying the (pid, secret) pair handed out in BackendKeyData.

use dashmap::DashMap;
use pgbridge_bridge::CancellationToken;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct Entry {
    secret: i32,
    /// Token of the statement currently in flight, if any.
    current: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct CancelRegistry {
    sessions: DashMap<i32, Entry>,
    next_pid: AtomicI32,
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            next_pid: AtomicI32::new(1),
        }
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a process id and secret for a new session. The entry is
    /// removed when the returned registration is dropped.
    pub fn register(self: &Arc<Self>) -> Registration {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let secret = rand::random::<i32>();
        self.sessions.insert(
            pid,
            Entry {
                secret,
                current: None,
            },
        );
        Registration {
            registry: self.clone(),
            pid,
            secret,
        }
    }

    /// Cancels the in-flight statement of `pid` when the secret matches.
    /// Returns whether a statement was cancelled.
    pub fn cancel(&self, pid: i32, secret: i32) -> bool {
        metrics::counter!("pgbridge_cancel_requests_total").increment(1);
        let Some(entry) = self.sessions.get(&pid) else {
            debug!(pid, "cancel request for unknown process");
            return false;
        };
        if entry.secret != secret {
            debug!(pid, "cancel request with wrong secret");
            return false;
        }
        match &entry.current {
            Some(token) => {
                info!(pid, "cancelling running statement");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// A session's entry in the registry.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancelRegistry>,
    pub pid: i32,
    pub secret: i32,
}

impl Registration {
    /// Fresh token for the next statement, visible to cancel requests until
    /// [`Registration::disarm`].
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(mut entry) = self.registry.sessions.get_mut(&self.pid) {
            entry.current = Some(token.clone());
        }
        token
    }

    pub fn disarm(&self) {
        if let Some(mut entry) = self.registry.sessions.get_mut(&self.pid) {
            entry.current = None;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.sessions.remove(&self.pid);
    }
}
