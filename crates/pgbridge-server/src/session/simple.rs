use super::execute::{rows_tag, RowEncoder};
use super::statement::{Execution, PreparedStatement};
use super::{Phase, Session};
use pgbridge_core::GatewayError;
use pgbridge_protocol::{BackendMessage, FormatCode};
use pgbridge_sql::split_statements;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Simple query: every statement in the string runs in order until the
    /// first error; one ReadyForQuery closes the cycle.
    pub(super) async fn simple_query(&mut self, sql: &str) -> Result<(), GatewayError> {
        self.phase = Phase::ExecutingSimple;
        info!(sql, "query received");
        let statements = split_statements(sql);
        if statements.is_empty() {
            self.send(BackendMessage::EmptyQueryResponse);
        }
        for statement in &statements {
            if let Err(err) = self.simple_statement(statement).await {
                if err.is_fatal() {
                    return Err(err);
                }
                self.report(&err);
                break;
            }
        }
        self.statements.remove("");
        self.portals.remove("");
        self.ready_for_query();
        self.flush().await
    }

    async fn simple_statement(&mut self, sql: &str) -> Result<(), GatewayError> {
        let started = Instant::now();
        metrics::counter!("pgbridge_queries_total").increment(1);
        let statement = PreparedStatement::new(&self.gateway, sql, Vec::new());
        match self.execute_plan(&statement.plan, sql, &[]).await? {
            Execution::Empty => self.send(BackendMessage::EmptyQueryResponse),
            Execution::Command { tag } => self.send(BackendMessage::CommandComplete { tag }),
            Execution::Rows { columns, rows } => {
                let encoder = RowEncoder::new(&columns, vec![FormatCode::Text; columns.len()]);
                self.send(encoder.description(&columns));
                for row in &rows {
                    let msg = encoder.encode(row)?;
                    self.send(msg);
                }
                let tag = rows_tag(&statement.plan, sql, rows.len());
                self.send(BackendMessage::CommandComplete { tag });
            }
        }
        let elapsed = started.elapsed();
        metrics::histogram!("pgbridge_query_duration_seconds").record(elapsed.as_secs_f64());
        debug!(elapsed_ms = elapsed.as_millis() as u64, "executed");
        Ok(())
    }
}
