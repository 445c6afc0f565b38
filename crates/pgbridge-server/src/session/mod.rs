//! Per-connection protocol state machine.

mod execute;
mod extended;
mod settings;
mod simple;
mod startup;
mod statement;

pub use startup::serve;

use crate::cancel::Registration;
use crate::server::Gateway;
use bytes::BytesMut;
use pgbridge_bridge::{CancellationToken, PooledConnection};
use pgbridge_core::GatewayError;
use pgbridge_protocol::backend::{encode_message, flush_buffer};
use pgbridge_protocol::frontend::read_message;
use pgbridge_protocol::{BackendMessage, FrontendMessage, TransactionState};
use settings::Settings;
use statement::{Portal, PreparedStatement};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingStartup,
    Authenticating,
    Ready,
    ExecutingSimple,
    Extended,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    InBlock,
    /// An error inside the block; only rollback or commit are accepted.
    Failed,
}

impl TxStatus {
    fn wire(self) -> TransactionState {
        match self {
            TxStatus::Idle => TransactionState::Idle,
            TxStatus::InBlock => TransactionState::Transaction,
            TxStatus::Failed => TransactionState::Error,
        }
    }
}

pub struct Session<S> {
    stream: S,
    out: BytesMut,
    gateway: Arc<Gateway>,
    phase: Phase,
    tx: TxStatus,
    user: String,
    database: String,
    settings: Settings,
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
    /// Backend connection held for the duration of a transaction block.
    pinned: Option<PooledConnection>,
    registration: Option<Registration>,
    /// Set by an error in the extended protocol; messages are discarded
    /// until the next Sync.
    skip_to_sync: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S, gateway: Arc<Gateway>) -> Self {
        Self {
            stream,
            out: BytesMut::with_capacity(8192),
            gateway,
            phase: Phase::AwaitingStartup,
            tx: TxStatus::Idle,
            user: String::new(),
            database: String::new(),
            settings: Settings::default(),
            statements: HashMap::new(),
            portals: HashMap::new(),
            pinned: None,
            registration: None,
            skip_to_sync: false,
        }
    }

    fn send(&mut self, msg: BackendMessage) {
        encode_message(&mut self.out, &msg);
    }

    async fn flush(&mut self) -> Result<(), GatewayError> {
        flush_buffer(&mut self.stream, &mut self.out)
            .await
            .map_err(|err| GatewayError::Protocol(format!("write failed: {err}")))
    }

    fn ready_for_query(&mut self) {
        self.phase = Phase::Ready;
        self.send(BackendMessage::ReadyForQuery {
            state: self.tx.wire(),
        });
    }

    /// Queues an ErrorResponse. Any error inside a transaction block fails
    /// the block.
    fn report(&mut self, err: &GatewayError) {
        metrics::counter!("pgbridge_query_errors_total").increment(1);
        warn!(code = err.sqlstate(), error = %err, "error");
        self.send(BackendMessage::error(err));
        if self.tx == TxStatus::InBlock {
            self.tx = TxStatus::Failed;
        }
    }

    /// Reports a fatal error and ends the session.
    async fn terminate(&mut self, err: &GatewayError) -> Result<(), GatewayError> {
        warn!(code = err.sqlstate(), error = %err, "fatal error");
        self.send(BackendMessage::error(err));
        self.phase = Phase::Terminated;
        self.flush().await
    }

    fn arm_cancel(&self) -> CancellationToken {
        self.registration
            .as_ref()
            .map(Registration::arm)
            .unwrap_or_default()
    }

    fn disarm_cancel(&self) {
        if let Some(registration) = &self.registration {
            registration.disarm();
        }
    }

    /// Message loop of an authenticated session.
    async fn run(&mut self) -> Result<(), GatewayError> {
        while self.phase != Phase::Terminated {
            let msg = match read_message(&mut self.stream).await {
                Ok(msg) => msg,
                Err(err) => match err.downcast::<GatewayError>() {
                    Ok(gateway_err) => return self.terminate(&gateway_err).await,
                    Err(io) => {
                        debug!("read failed: {io}");
                        break;
                    }
                },
            };
            if let Err(err) = self.dispatch(msg).await {
                if err.is_fatal() {
                    return self.terminate(&err).await;
                }
                return Err(err);
            }
        }
        self.phase = Phase::Terminated;
        Ok(())
    }

    async fn dispatch(&mut self, msg: FrontendMessage) -> Result<(), GatewayError> {
        match msg {
            FrontendMessage::Query { sql } => self.simple_query(&sql).await,
            FrontendMessage::Parse { .. }
            | FrontendMessage::Bind { .. }
            | FrontendMessage::Describe { .. }
            | FrontendMessage::Execute { .. }
            | FrontendMessage::Close { .. } => {
                self.phase = Phase::Extended;
                if self.skip_to_sync {
                    return Ok(());
                }
                if let Err(err) = self.extended(msg).await {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    self.report(&err);
                    self.skip_to_sync = true;
                }
                Ok(())
            }
            FrontendMessage::Sync => {
                self.sync();
                self.flush().await
            }
            FrontendMessage::Flush => self.flush().await,
            FrontendMessage::Terminate => {
                debug!("client terminated");
                self.phase = Phase::Terminated;
                Ok(())
            }
            FrontendMessage::Unsupported { code } => {
                let err = GatewayError::NotSupported(format!(
                    "frontend message type '{}'",
                    code as char
                ));
                self.report(&err);
                self.ready_for_query();
                self.flush().await
            }
            FrontendMessage::Password { .. }
            | FrontendMessage::Startup { .. }
            | FrontendMessage::SslRequest
            | FrontendMessage::GssEncRequest
            | FrontendMessage::CancelRequest { .. } => Err(GatewayError::Protocol(
                "unexpected startup-phase message".into(),
            )),
        }
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        // An open backend transaction must not go back to the pool.
        if let Some(conn) = self.pinned.as_mut() {
            conn.discard();
        }
    }
}
