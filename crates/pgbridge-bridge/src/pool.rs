use crate::connector::{BackendConnection, Connector, Interrupt};
use crate::outcome::BridgeError;
use crate::retry::RetryPolicy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept idle for reuse.
    pub base_size: usize,
    /// Extra connections allowed under load; closed when returned.
    pub overflow: usize,
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_size: 10,
            overflow: 5,
            acquire_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub capacity: usize,
}

struct Slot {
    conn: Box<dyn BackendConnection>,
    created_at: Instant,
    last_validated: Instant,
}

impl Slot {
    fn expired(&self, config: &PoolConfig) -> bool {
        self.created_at.elapsed() > config.max_lifetime
            || self.last_validated.elapsed() > config.idle_timeout
    }
}

struct Shared {
    config: PoolConfig,
    idle: Mutex<VecDeque<Slot>>,
    in_use: AtomicUsize,
}

impl Shared {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Slot>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of backend connections. Connections are opened lazily and
/// a semaphore caps the total at `base_size + overflow`.
pub struct Pool {
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl Pool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig, retry: RetryPolicy) -> Self {
        let capacity = (config.base_size + config.overflow).max(1);
        info!(
            base = config.base_size,
            overflow = config.overflow,
            "backend pool configured"
        );
        Self {
            connector,
            retry,
            permits: Arc::new(Semaphore::new(capacity)),
            shared: Arc::new(Shared {
                config,
                idle: Mutex::new(VecDeque::new()),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Checks out a connection, waiting at most `acquire_timeout` for a
    /// free slot. Expired idle connections are closed and replaced.
    pub async fn acquire(&self) -> Result<PooledConnection, BridgeError> {
        let wait = self.shared.config.acquire_timeout;
        let permit = match tokio::time::timeout(wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(BridgeError::Unavailable("pool closed".into())),
            Err(_) => {
                metrics::counter!("pgbridge_pool_exhausted_total").increment(1);
                return Err(BridgeError::PoolExhausted(wait));
            }
        };

        let reused = loop {
            let Some(slot) = self.shared.idle().pop_front() else {
                break None;
            };
            if slot.expired(&self.shared.config) {
                debug!("closing expired backend connection");
                continue;
            }
            break Some(slot);
        };
        let slot = match reused {
            Some(slot) => slot,
            None => self.open().await?,
        };
        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            slot: Some(slot),
            shared: self.shared.clone(),
            discard: false,
            _permit: permit,
        })
    }

    async fn open(&self) -> Result<Slot, BridgeError> {
        let conn = self
            .retry
            .run(|| self.connector.connect())
            .await
            .map_err(|err| BridgeError::Unavailable(err.message))?;
        debug!("opened backend connection");
        let now = Instant::now();
        Ok(Slot {
            conn,
            created_at: now,
            last_validated: now,
        })
    }

    pub fn status(&self) -> PoolStatus {
        let config = &self.shared.config;
        PoolStatus {
            idle: self.shared.idle().len(),
            in_use: self.shared.in_use.load(Ordering::SeqCst),
            capacity: (config.base_size + config.overflow).max(1),
        }
    }
}

/// A checked-out connection. Returned to the pool on drop unless it was
/// marked for discard.
pub struct PooledConnection {
    slot: Option<Slot>,
    shared: Arc<Shared>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn connection(&mut self) -> Option<&mut (dyn BackendConnection + 'static)> {
        self.slot.as_mut().map(|slot| slot.conn.as_mut())
    }

    pub fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        self.slot.as_ref().map(|slot| slot.conn.interrupt_handle())
    }

    /// The connection is closed instead of being reused.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    pub fn is_discarded(&self) -> bool {
        self.discard
    }

    pub(crate) fn mark_validated(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.last_validated = Instant::now();
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.shared.in_use.fetch_sub(1, Ordering::SeqCst);
        let Some(mut slot) = self.slot.take() else {
            return;
        };
        if self.discard {
            debug!("discarding backend connection");
            return;
        }
        let mut idle = self.shared.idle();
        if idle.len() < self.shared.config.base_size {
            slot.last_validated = Instant::now();
            idle.push_back(slot);
        }
    }
}
