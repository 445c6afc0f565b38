use super::execute::{rows_tag, RowEncoder};
use super::statement::{Cursor, Portal, PreparedStatement};
use super::Session;
use pgbridge_core::{Column, GatewayError};
use pgbridge_protocol::codec::{decode_param, resolve_formats};
use pgbridge_protocol::{BackendMessage, CloseTarget, DescribeTarget, FormatCode, FrontendMessage};
use pgbridge_sql::split_statements;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Parameter format codes: none means text, one applies to every
/// parameter, otherwise one per parameter.
fn param_formats(codes: &[i16], params: usize) -> Result<Vec<FormatCode>, GatewayError> {
    match codes.len() {
        0 => Ok(vec![FormatCode::Text; params]),
        1 => Ok(vec![FormatCode::from_code(codes[0])?; params]),
        n if n == params => codes.iter().map(|c| FormatCode::from_code(*c)).collect(),
        n => Err(GatewayError::InvalidMessage(format!(
            "bind message has {n} parameter formats but {params} parameters"
        ))),
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(super) async fn extended(&mut self, msg: FrontendMessage) -> Result<(), GatewayError> {
        match msg {
            FrontendMessage::Parse {
                statement_name,
                query,
                param_oids,
            } => self.parse(statement_name, &query, param_oids),
            FrontendMessage::Bind {
                portal_name,
                statement_name,
                param_format_codes,
                param_values,
                result_format_codes,
            } => self.bind(
                portal_name,
                &statement_name,
                &param_format_codes,
                &param_values,
                result_format_codes,
            ),
            FrontendMessage::Describe { target, name } => match target {
                DescribeTarget::Statement => self.describe_statement(&name).await,
                DescribeTarget::Portal => self.describe_portal(&name).await,
            },
            FrontendMessage::Execute {
                portal_name,
                max_rows,
            } => self.execute(&portal_name, max_rows).await,
            FrontendMessage::Close { target, name } => {
                match target {
                    CloseTarget::Statement => {
                        self.statements.remove(&name);
                        self.portals.retain(|_, p| p.statement != name);
                    }
                    CloseTarget::Portal => {
                        self.portals.remove(&name);
                    }
                }
                self.send(BackendMessage::CloseComplete);
                Ok(())
            }
            other => Err(GatewayError::Internal(format!(
                "not an extended query message: {other:?}"
            ))),
        }
    }

    fn parse(&mut self, name: String, sql: &str, declared: Vec<u32>) -> Result<(), GatewayError> {
        if !name.is_empty() && self.statements.contains_key(&name) {
            return Err(GatewayError::DuplicateStatement(name));
        }
        if split_statements(sql).len() > 1 {
            return Err(GatewayError::backend(
                "42601",
                "cannot insert multiple commands into a prepared statement",
            ));
        }
        let statement = PreparedStatement::new(&self.gateway, sql, declared);
        debug!(
            statement = %name,
            params = statement.param_types.len(),
            "parsed"
        );
        self.statements.insert(name, statement);
        self.send(BackendMessage::ParseComplete);
        Ok(())
    }

    fn bind(
        &mut self,
        portal_name: String,
        statement_name: &str,
        format_codes: &[i16],
        raw_values: &[Option<Vec<u8>>],
        result_formats: Vec<i16>,
    ) -> Result<(), GatewayError> {
        let statement = self
            .statements
            .get(statement_name)
            .ok_or_else(|| GatewayError::UnknownStatement(statement_name.to_string()))?;
        let expected = statement.param_types.len();
        if raw_values.len() != expected {
            return Err(GatewayError::InvalidMessage(format!(
                "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                raw_values.len(),
                statement_name,
                expected
            )));
        }
        let formats = param_formats(format_codes, raw_values.len())?;
        let params = raw_values
            .iter()
            .zip(&statement.param_types)
            .zip(formats)
            .map(|((raw, oid), format)| decode_param(raw.as_deref(), *oid, format))
            .collect::<Result<Vec<_>, _>>()?;
        for code in &result_formats {
            FormatCode::from_code(*code)?;
        }
        if !portal_name.is_empty() && self.portals.contains_key(&portal_name) {
            return Err(GatewayError::backend(
                "42P03",
                format!("cursor \"{portal_name}\" already exists"),
            ));
        }
        let portal = Portal {
            statement: statement_name.to_string(),
            sql: statement.sql.clone(),
            plan: statement.plan.clone(),
            params,
            result_formats,
            columns: statement.columns.clone(),
            cursor: None,
        };
        self.portals.insert(portal_name, portal);
        self.send(BackendMessage::BindComplete);
        Ok(())
    }

    async fn describe_statement(&mut self, name: &str) -> Result<(), GatewayError> {
        let statement = self
            .statements
            .get(name)
            .ok_or_else(|| GatewayError::UnknownStatement(name.to_string()))?;
        let type_oids = statement.param_types.clone();
        let (cached, plan, sql) = (
            statement.columns.clone(),
            statement.plan.clone(),
            statement.sql.clone(),
        );
        let columns = match cached {
            Some(columns) => Some(columns),
            None => {
                let columns = self.infer_columns(&plan, &sql).await?;
                if let Some(statement) = self.statements.get_mut(name) {
                    statement.columns = columns.clone();
                }
                columns
            }
        };
        self.send(BackendMessage::ParameterDescription { type_oids });
        self.send_description(columns.as_deref(), &[])
    }

    async fn describe_portal(&mut self, name: &str) -> Result<(), GatewayError> {
        let portal = self
            .portals
            .get(name)
            .ok_or_else(|| GatewayError::UnknownPortal(name.to_string()))?;
        let known = match (&portal.cursor, &portal.columns) {
            (Some(Cursor::Rows { columns, .. }), _) => Some(Some(columns.clone())),
            (Some(_), _) => Some(None),
            (None, Some(columns)) => Some(Some(columns.clone())),
            (None, None) => None,
        };
        let (plan, sql, codes) = (
            portal.plan.clone(),
            portal.sql.clone(),
            portal.result_formats.clone(),
        );
        let columns = match known {
            Some(columns) => columns,
            None => self.infer_columns(&plan, &sql).await?,
        };
        if let (Some(columns), Some(portal)) = (&columns, self.portals.get_mut(name)) {
            portal.columns = Some(columns.clone());
        }
        self.send_description(columns.as_deref(), &codes)
    }

    fn send_description(
        &mut self,
        columns: Option<&[Column]>,
        codes: &[i16],
    ) -> Result<(), GatewayError> {
        match columns {
            Some(columns) if !columns.is_empty() => {
                let formats = resolve_formats(codes, columns.len())?;
                let description = RowEncoder::new(columns, formats).description(columns);
                self.send(description);
            }
            _ => self.send(BackendMessage::NoData),
        }
        Ok(())
    }

    /// Runs the portal on its first Execute and then streams the buffered
    /// rows, `max_rows` at a time when the client asks for a limit.
    async fn execute(&mut self, name: &str, max_rows: i32) -> Result<(), GatewayError> {
        let started = Instant::now();
        let mut portal = self
            .portals
            .remove(name)
            .ok_or_else(|| GatewayError::UnknownPortal(name.to_string()))?;
        metrics::counter!("pgbridge_queries_total").increment(1);
        let result = self.run_portal(&mut portal, max_rows).await;
        self.portals.insert(name.to_string(), portal);

        let elapsed = started.elapsed();
        metrics::histogram!("pgbridge_query_duration_seconds").record(elapsed.as_secs_f64());
        debug!(
            portal = name,
            suspended = matches!(result, Ok(false)),
            elapsed_ms = elapsed.as_millis() as u64,
            "executed"
        );
        result.map(|_| ())
    }

    /// Returns `true` when the portal finished, `false` when suspended.
    async fn run_portal(&mut self, portal: &mut Portal, max_rows: i32) -> Result<bool, GatewayError> {
        if portal.cursor.is_none() {
            let execution = self
                .execute_plan(&portal.plan, &portal.sql, &portal.params)
                .await?;
            portal.cursor = Some(execution.into());
        }
        match portal.cursor.as_mut() {
            None | Some(Cursor::Empty) => self.send(BackendMessage::EmptyQueryResponse),
            Some(Cursor::Done { tag }) => {
                let tag = tag.clone();
                self.send(BackendMessage::CommandComplete { tag });
            }
            Some(Cursor::Rows {
                columns,
                rows,
                position,
            }) => {
                let described = portal.columns.as_deref().unwrap_or(columns.as_slice());
                let formats = resolve_formats(&portal.result_formats, described.len())?;
                let encoder = RowEncoder::new(described, formats);
                let remaining = rows.len() - *position;
                let batch = match usize::try_from(max_rows) {
                    Ok(limit) if limit > 0 => limit.min(remaining),
                    _ => remaining,
                };
                for row in &rows[*position..*position + batch] {
                    let msg = encoder.encode(row)?;
                    self.send(msg);
                }
                *position += batch;
                if *position < rows.len() {
                    self.send(BackendMessage::PortalSuspended);
                    return Ok(false);
                }
                let tag = rows_tag(&portal.plan, &portal.sql, batch);
                self.send(BackendMessage::CommandComplete { tag });
            }
        }
        Ok(true)
    }

    /// Ends an extended-query cycle. The unnamed statement and portal do not
    /// outlive it.
    pub(super) fn sync(&mut self) {
        self.skip_to_sync = false;
        self.portals.remove("");
        self.statements.remove("");
        self.ready_for_query();
    }
}
