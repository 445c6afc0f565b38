use crate::connector::{BackendFailure, Connector, RawOutcome};
use crate::outcome::{BridgeError, Outcome};
use crate::pool::{Pool, PoolConfig, PoolStatus, PooledConnection};
use crate::retry::RetryPolicy;
use pgbridge_core::{Column, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub statement_timeout: Option<Duration>,
    pub health_timeout: Duration,
    pub probe_sql: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            statement_timeout: None,
            health_timeout: Duration::from_secs(2),
            probe_sql: "SELECT 1".to_string(),
        }
    }
}

/// Runs backend statements on pooled connections with timeout and
/// cancellation. An aborted call interrupts the backend and the connection
/// is discarded.
pub struct Bridge {
    pool: Pool,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(
        connector: Arc<dyn Connector>,
        pool: PoolConfig,
        retry: RetryPolicy,
        config: BridgeConfig,
    ) -> Self {
        Self {
            pool: Pool::new(connector, pool, retry),
            config,
        }
    }

    pub async fn acquire(&self) -> Result<PooledConnection, BridgeError> {
        self.pool.acquire().await
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Executes on a freshly checked-out connection. A connection that turns
    /// out to be dead is replaced and the statement retried with backoff.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Outcome, BridgeError> {
        let mut attempt = 0;
        loop {
            let mut conn = self.acquire().await?;
            match self.execute_on(&mut conn, sql, params, cancel).await {
                Err(BridgeError::Backend(failure)) if failure.disconnected => {
                    drop(conn);
                    attempt = self.reconnect_backoff(attempt, failure, cancel).await?;
                }
                result => return result,
            }
        }
    }

    /// Executes on a connection the caller holds, such as the one pinned
    /// by an open transaction block.
    pub async fn execute_on(
        &self,
        conn: &mut PooledConnection,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<Outcome, BridgeError> {
        let started = Instant::now();
        let reply = self
            .guarded(conn, cancel, Call::Execute(sql, params))
            .await?;
        let outcome = match reply {
            Ok(Reply::Raw(raw)) => Ok(Outcome::from_raw(sql, raw)),
            Ok(Reply::Columns(columns)) => Ok(Outcome::Rows {
                columns,
                rows: Vec::new(),
            }),
            Err(failure) => {
                if failure.disconnected {
                    conn.discard();
                }
                Outcome::from_failure(sql, failure)
            }
        };
        let elapsed = started.elapsed();
        metrics::histogram!("pgbridge_backend_duration_seconds").record(elapsed.as_secs_f64());
        debug!(
            sql,
            ok = outcome.is_ok(),
            elapsed_ms = elapsed.as_millis() as u64,
            "backend call finished"
        );
        outcome
    }

    pub async fn describe(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Column>, BridgeError> {
        let mut attempt = 0;
        loop {
            let mut conn = self.acquire().await?;
            match self.describe_on(&mut conn, sql, cancel).await {
                Err(BridgeError::Backend(failure)) if failure.disconnected => {
                    drop(conn);
                    attempt = self.reconnect_backoff(attempt, failure, cancel).await?;
                }
                result => return result,
            }
        }
    }

    /// Waits before retry number `attempt + 1` on a new connection, or gives
    /// up with `Unavailable` once the policy's attempts are spent.
    async fn reconnect_backoff(
        &self,
        attempt: u32,
        failure: BackendFailure,
        cancel: &CancellationToken,
    ) -> Result<u32, BridgeError> {
        let policy = self.pool.retry_policy();
        if attempt + 1 >= policy.max_attempts.max(1) {
            warn!(attempts = attempt + 1, error = %failure, "backend unreachable, giving up");
            return Err(BridgeError::Unavailable(failure.message));
        }
        let delay = policy.delay(attempt);
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "backend connection lost, reconnecting"
        );
        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(attempt + 1),
        }
    }

    pub async fn describe_on(
        &self,
        conn: &mut PooledConnection,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Column>, BridgeError> {
        match self.guarded(conn, cancel, Call::Describe(sql)).await? {
            Ok(Reply::Columns(columns)) => Ok(columns),
            Ok(Reply::Raw(RawOutcome::Rows(set))) => Ok(set.columns),
            Ok(Reply::Raw(RawOutcome::Affected(_))) => Ok(Vec::new()),
            Err(failure) => {
                if failure.disconnected {
                    conn.discard();
                }
                Err(BridgeError::Backend(failure))
            }
        }
    }

    /// Runs the probe statement under the health timeout and reports how
    /// long it took.
    pub async fn health(&self) -> Result<Duration, BridgeError> {
        let started = Instant::now();
        let probe = async {
            let mut conn = self.acquire().await?;
            let Some(backend) = conn.connection() else {
                return Err(BridgeError::Unavailable("connection released".into()));
            };
            match backend.execute(&self.config.probe_sql, &[]).await {
                Ok(_) => {
                    conn.mark_validated();
                    Ok(())
                }
                Err(failure) => {
                    conn.discard();
                    Err(BridgeError::Backend(failure))
                }
            }
        };
        match tokio::time::timeout(self.config.health_timeout, probe).await {
            Ok(result) => result.map(|_| started.elapsed()),
            Err(_) => {
                warn!("backend health probe timed out");
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Races the backend call against cancellation and the statement
    /// timeout. The inner result is the backend's; the outer error is ours.
    async fn guarded(
        &self,
        conn: &mut PooledConnection,
        cancel: &CancellationToken,
        call: Call<'_>,
    ) -> Result<Result<Reply, BackendFailure>, BridgeError> {
        let released = || BridgeError::Unavailable("connection released".into());
        let interrupt = conn.interrupt_handle().ok_or_else(released)?;
        let deadline = self.config.statement_timeout;
        let timer = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let aborted = {
            let backend = conn.connection().ok_or_else(released)?;
            let work = async move {
                match call {
                    Call::Execute(sql, params) => backend.execute(sql, params).await.map(Reply::Raw),
                    Call::Describe(sql) => backend.describe(sql).await.map(Reply::Columns),
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => BridgeError::Cancelled,
                _ = timer => BridgeError::Timeout,
                result = work => return Ok(result),
            }
        };
        interrupt.interrupt();
        conn.discard();
        warn!(reason = %aborted, "backend call aborted");
        Err(aborted)
    }
}

enum Call<'a> {
    Execute(&'a str, &'a [Value]),
    Describe(&'a str),
}

enum Reply {
    Raw(RawOutcome),
    Columns(Vec<Column>),
}
