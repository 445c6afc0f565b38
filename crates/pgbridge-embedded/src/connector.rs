use crate::catalog::Database;
use crate::executor::{describe, Executor, Session};
use async_trait::async_trait;
use pgbridge_bridge::{BackendConnection, BackendFailure, Connector, Interrupt, RawOutcome};
use pgbridge_core::{Column, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens connections to an in-process database shared by all of them.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedConnector {
    db: Arc<Mutex<Database>>,
}

impl EmbeddedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    pub fn open(&self) -> EmbeddedConnection {
        EmbeddedConnection {
            db: self.db.clone(),
            session: Arc::new(Mutex::new(Session::default())),
            interrupt: Arc::new(InterruptFlag::default()),
        }
    }
}

#[async_trait]
impl Connector for EmbeddedConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendFailure> {
        debug!("embedded connection opened");
        Ok(Box::new(self.open()))
    }
}

#[derive(Debug, Default)]
struct InterruptFlag(AtomicBool);

impl Interrupt for InterruptFlag {
    fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One backend connection. Statements run on the blocking pool so a
/// caller that stops waiting does not stall the runtime; the interrupt flag
/// stops the statement at its next row.
pub struct EmbeddedConnection {
    db: Arc<Mutex<Database>>,
    session: Arc<Mutex<Session>>,
    interrupt: Arc<InterruptFlag>,
}

impl EmbeddedConnection {
    pub fn in_transaction(&self) -> bool {
        lock(&self.session).in_transaction()
    }
}

async fn blocking<T, F>(work: F) -> Result<T, BackendFailure>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| BackendFailure::disconnected(format!("embedded engine task failed: {err}")))
}

#[async_trait]
impl BackendConnection for EmbeddedConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RawOutcome, BackendFailure> {
        let db = self.db.clone();
        let session = self.session.clone();
        let flag = self.interrupt.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        let result = blocking(move || {
            let mut db = lock(&db);
            let mut session = lock(&session);
            let result = Executor::new(&mut db, &mut session, &flag.0).execute(&sql, &params);
            flag.0.store(false, Ordering::SeqCst);
            result
        })
        .await?;
        result.map_err(BackendFailure::from)
    }

    async fn describe(&mut self, sql: &str) -> Result<Vec<Column>, BackendFailure> {
        let db = self.db.clone();
        let sql = sql.to_string();
        blocking(move || describe(&lock(&db), &sql))
            .await?
            .map_err(BackendFailure::from)
    }

    fn interrupt_handle(&self) -> Arc<dyn Interrupt> {
        self.interrupt.clone()
    }
}

impl Drop for EmbeddedConnection {
    fn drop(&mut self) {
        let db = self.db.clone();
        let session = self.session.clone();
        let abandon = move || {
            let mut db = lock(&db);
            lock(&session).abandon(&mut db);
        };
        // A statement may still hold the locks after its caller gave up.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(abandon);
            }
            Err(_) => abandon(),
        }
    }
}
