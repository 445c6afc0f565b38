use super::statement::{Execution, Plan};
use super::{Session, TxStatus};
use pgbridge_bridge::{load_snapshot, Outcome};
use pgbridge_core::pgtype::type_modifier;
use pgbridge_core::{Column, GatewayError, PgType, Row, Value};
use pgbridge_protocol::codec::encode_value;
use pgbridge_protocol::{BackendMessage, FormatCode, RowDescriptionField};
use pgbridge_sql::output::{fold_column_names, translate_rows};
use pgbridge_sql::{
    command_tag, inline_order_by_vectors, CatalogContext, CatalogSnapshot, TransactionCommand,
    Translation,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Encodes rows of one result with the column types fixed up front.
pub(super) struct RowEncoder {
    types: Vec<PgType>,
    formats: Vec<FormatCode>,
}

impl RowEncoder {
    pub fn new(columns: &[Column], formats: Vec<FormatCode>) -> Self {
        Self {
            types: columns
                .iter()
                .map(|c| PgType::from_backend(&c.type_name))
                .collect(),
            formats,
        }
    }

    fn format(&self, idx: usize) -> FormatCode {
        self.formats.get(idx).copied().unwrap_or(FormatCode::Text)
    }

    pub fn description(&self, columns: &[Column]) -> BackendMessage {
        let fields = columns
            .iter()
            .zip(&self.types)
            .enumerate()
            .map(|(idx, (column, pg))| RowDescriptionField {
                type_modifier: type_modifier(&column.type_name),
                ..RowDescriptionField::new(column.name.clone(), pg.oid, pg.len)
                    .with_format(self.format(idx))
            })
            .collect();
        BackendMessage::RowDescription { fields }
    }

    pub fn encode(&self, row: &Row) -> Result<BackendMessage, GatewayError> {
        let values = self
            .types
            .iter()
            .enumerate()
            .map(|(idx, pg)| {
                let value = row.get(idx).unwrap_or(&Value::Null);
                encode_value(value, pg, self.format(idx))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BackendMessage::DataRow { values })
    }
}

/// CommandComplete tag for a statement that returned `rows` rows.
pub(super) fn rows_tag(plan: &Plan, sql: &str, rows: usize) -> String {
    match plan {
        Plan::Show(_) => "SHOW".to_string(),
        _ => command_tag(sql, rows as u64),
    }
}

fn text_columns(names: &[&str]) -> Vec<Column> {
    names.iter().map(|name| Column::new(*name, "TEXT")).collect()
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Runs one planned statement. Nothing is written except notices and
    /// ParameterStatus messages the statement itself triggers.
    pub(super) async fn execute_plan(
        &mut self,
        plan: &Plan,
        sql: &str,
        params: &[Value],
    ) -> Result<Execution, GatewayError> {
        if self.tx == TxStatus::Failed && !plan.allowed_in_failed_block() {
            return Err(GatewayError::InFailedTransaction);
        }
        match plan {
            Plan::Empty => Ok(Execution::Empty),
            Plan::Transaction {
                command,
                translation,
            } => self.transaction(command, translation).await,
            Plan::Deallocate(name) => {
                match name {
                    Some(name) => {
                        self.statements.remove(name);
                        self.portals.retain(|_, p| &p.statement != name);
                    }
                    None => {
                        self.statements.clear();
                        self.portals.clear();
                    }
                }
                Ok(Execution::Command {
                    tag: "DEALLOCATE".into(),
                })
            }
            Plan::Set { name, value } => {
                if let Some(key) = self.settings.set(name, value) {
                    self.send(BackendMessage::ParameterStatus {
                        key,
                        value: value.clone(),
                    });
                }
                Ok(Execution::Command { tag: "SET".into() })
            }
            Plan::Show(name) => self.show(name),
            Plan::Catalog { .. } => {
                let snapshot = self.catalog_snapshot().await?;
                let mapping = self.gateway.mapping.get();
                let ctx = CatalogContext {
                    snapshot: &snapshot,
                    mapping: &mapping,
                    user: &self.user,
                    database: &self.database,
                };
                let result = self.gateway.catalog.execute(sql, &ctx, params)?;
                Ok(Execution::Rows {
                    columns: result.columns,
                    rows: result.rows,
                })
            }
            Plan::Backend { translation, .. } => {
                let bound = translation.bind(params).ok_or_else(|| {
                    GatewayError::InvalidMessage(format!(
                        "statement requires {} parameters, {} supplied",
                        translation.param_count,
                        params.len()
                    ))
                })?;
                let statement = inline_order_by_vectors(&translation.sql, bound);
                let outcome = self.call_backend(&statement.sql, &statement.params).await?;
                Ok(self.client_result(outcome))
            }
        }
    }

    async fn catalog_snapshot(&mut self) -> Result<CatalogSnapshot, GatewayError> {
        let token = self.arm_cancel();
        let snapshot = load_snapshot(&self.gateway.bridge, &token).await;
        self.disarm_cancel();
        Ok(snapshot?)
    }

    fn show(&self, name: &str) -> Result<Execution, GatewayError> {
        if name.eq_ignore_ascii_case("all") {
            let rows = self
                .settings
                .all()
                .map(|(name, value)| vec![Value::Text(name.into()), Value::Text(value.into())])
                .collect();
            return Ok(Execution::Rows {
                columns: text_columns(&["name", "setting"]),
                rows,
            });
        }
        let key = if name.eq_ignore_ascii_case("transaction isolation level") {
            "transaction_isolation"
        } else {
            name
        };
        let value = self.settings.get(key).ok_or_else(|| {
            GatewayError::backend(
                "42704",
                format!("unrecognized configuration parameter \"{name}\""),
            )
        })?;
        Ok(Execution::Rows {
            columns: text_columns(&[key]),
            rows: vec![vec![Value::Text(value.to_string())]],
        })
    }

    /// Sends `sql` on the pinned connection when a block is open, otherwise
    /// on a pooled one for this statement only.
    async fn call_backend(&mut self, sql: &str, params: &[Value]) -> Result<Outcome, GatewayError> {
        let bridge = self.gateway.bridge.clone();
        let token = self.arm_cancel();
        let result = match self.pinned.as_mut() {
            Some(conn) => bridge.execute_on(conn, sql, params, &token).await,
            None => bridge.execute(sql, params, &token).await,
        };
        self.disarm_cancel();
        Ok(result?)
    }

    fn client_result(&self, outcome: Outcome) -> Execution {
        match outcome {
            Outcome::Command { tag } => Execution::Command { tag },
            Outcome::Rows {
                mut columns,
                mut rows,
            } => {
                let mapping = self.gateway.mapping.get();
                translate_rows(&columns, &mut rows, &mapping);
                if self.gateway.config.translation.fold_result_names {
                    fold_column_names(&mut columns);
                }
                Execution::Rows { columns, rows }
            }
        }
    }

    async fn transaction(
        &mut self,
        command: &TransactionCommand,
        translation: &Translation,
    ) -> Result<Execution, GatewayError> {
        let tag = command.tag().to_string();
        match command {
            TransactionCommand::Begin => {
                if self.tx != TxStatus::Idle {
                    self.send(BackendMessage::notice(
                        "25001",
                        "there is already a transaction in progress",
                    ));
                    return Ok(Execution::Command { tag });
                }
                let conn = self.gateway.bridge.acquire().await?;
                self.pinned = Some(conn);
                if let Err(err) = self.call_backend(&translation.sql, &[]).await {
                    self.pinned = None;
                    return Err(err);
                }
                self.tx = TxStatus::InBlock;
                debug!("transaction block opened");
                Ok(Execution::Command { tag })
            }
            TransactionCommand::Commit | TransactionCommand::Rollback => {
                match self.tx {
                    TxStatus::Idle => {
                        self.send(BackendMessage::notice(
                            "25P01",
                            "there is no transaction in progress",
                        ));
                        Ok(Execution::Command { tag })
                    }
                    TxStatus::Failed => {
                        // COMMIT of a failed block rolls back.
                        self.finish_block("ROLLBACK").await?;
                        Ok(Execution::Command {
                            tag: "ROLLBACK".into(),
                        })
                    }
                    TxStatus::InBlock => {
                        self.finish_block(&translation.sql).await?;
                        Ok(Execution::Command { tag })
                    }
                }
            }
            TransactionCommand::Savepoint(_)
            | TransactionCommand::Release(_)
            | TransactionCommand::RollbackTo(_) => {
                if self.tx == TxStatus::Idle {
                    let verb = match command {
                        TransactionCommand::Savepoint(_) => "SAVEPOINT",
                        TransactionCommand::Release(_) => "RELEASE SAVEPOINT",
                        _ => "ROLLBACK TO SAVEPOINT",
                    };
                    return Err(GatewayError::backend(
                        "25P01",
                        format!("{verb} can only be used in transaction blocks"),
                    ));
                }
                self.call_backend(&translation.sql, &[]).await?;
                if matches!(command, TransactionCommand::RollbackTo(_)) {
                    self.tx = TxStatus::InBlock;
                }
                Ok(Execution::Command { tag })
            }
        }
    }

    /// Ends the open block. The session is idle afterwards whether or not the
    /// backend accepted the statement; the pinned connection is released.
    async fn finish_block(&mut self, sql: &str) -> Result<(), GatewayError> {
        self.tx = TxStatus::Idle;
        let alive = self.pinned.as_ref().is_some_and(|conn| !conn.is_discarded());
        let result = if alive {
            self.call_backend(sql, &[]).await.map(|_| ())
        } else {
            Ok(())
        };
        if let (Err(_), Some(conn)) = (&result, self.pinned.as_mut()) {
            conn.discard();
        }
        self.pinned = None;
        debug!(sql, "transaction block closed");
        result
    }

    /// Result columns of a statement without running it.
    pub(super) async fn infer_columns(
        &mut self,
        plan: &Plan,
        sql: &str,
    ) -> Result<Option<Vec<Column>>, GatewayError> {
        match plan {
            Plan::Catalog { param_count } => {
                let snapshot = self.catalog_snapshot().await?;
                let mapping = self.gateway.mapping.get();
                let ctx = CatalogContext {
                    snapshot: &snapshot,
                    mapping: &mapping,
                    user: &self.user,
                    database: &self.database,
                };
                let result = self.gateway.catalog.describe(sql, &ctx, *param_count)?;
                Ok(Some(result.columns))
            }
            Plan::Show(name) => match self.show(name)? {
                Execution::Rows { columns, .. } => Ok(Some(columns)),
                _ => Ok(None),
            },
            Plan::Backend {
                translation,
                returns_rows: true,
            } => {
                let bridge = self.gateway.bridge.clone();
                let token = self.arm_cancel();
                let result = match self.pinned.as_mut() {
                    Some(conn) => bridge.describe_on(conn, &translation.sql, &token).await,
                    None => bridge.describe(&translation.sql, &token).await,
                };
                self.disarm_cancel();
                let mut columns = result?;
                if self.gateway.config.translation.fold_result_names {
                    fold_column_names(&mut columns);
                }
                Ok(Some(columns))
            }
            _ => Ok(None),
        }
    }
}
