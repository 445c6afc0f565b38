use super::settings::Settings;
use super::{Phase, Session};
use crate::auth::SCRAM_MECHANISM;
use crate::config::AuthMethod;
use crate::server::Gateway;
use pgbridge_core::GatewayError;
use pgbridge_protocol::frontend::{read_message_limited, read_startup, MAX_AUTH_MESSAGE_LEN};
use pgbridge_protocol::messages::{
    parse_password, parse_sasl_initial_response, PROTOCOL_VERSION_3,
};
use pgbridge_protocol::{BackendMessage, FrontendMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, Span};

/// Serves one client connection from its first byte: SSL/GSS negotiation,
/// cancel requests, then the session proper.
pub async fn serve<S>(mut stream: S, gateway: Arc<Gateway>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        match read_startup(&mut stream).await? {
            FrontendMessage::SslRequest => match gateway.tls.clone() {
                Some(acceptor) => {
                    stream.write_all(b"S").await?;
                    stream.flush().await?;
                    let tls = acceptor.accept(stream).await?;
                    debug!("tls established");
                    let mut session = Session::new(tls, gateway);
                    return Ok(session.after_tls().await?);
                }
                None => {
                    stream.write_all(b"N").await?;
                    stream.flush().await?;
                }
            },
            FrontendMessage::GssEncRequest => {
                stream.write_all(b"N").await?;
                stream.flush().await?;
            }
            FrontendMessage::CancelRequest { pid, secret } => {
                gateway.cancel.cancel(pid, secret);
                return Ok(());
            }
            FrontendMessage::Startup { protocol, params } => {
                let mut session = Session::new(stream, gateway);
                return Ok(session.start(protocol, params).await?);
            }
            _ => {
                return Err(GatewayError::Protocol("unexpected startup packet".into()).into());
            }
        }
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// The client repeats its startup packet inside the TLS tunnel.
    async fn after_tls(&mut self) -> Result<(), GatewayError> {
        let packet = read_startup(&mut self.stream)
            .await
            .map_err(|err| GatewayError::Protocol(err.to_string()))?;
        match packet {
            FrontendMessage::Startup { protocol, params } => self.start(protocol, params).await,
            FrontendMessage::CancelRequest { pid, secret } => {
                self.gateway.cancel.cancel(pid, secret);
                Ok(())
            }
            _ => {
                self.terminate(&GatewayError::Protocol("unexpected startup packet".into()))
                    .await
            }
        }
    }

    async fn start(
        &mut self,
        protocol: i32,
        params: HashMap<String, String>,
    ) -> Result<(), GatewayError> {
        self.phase = Phase::Authenticating;
        if protocol != PROTOCOL_VERSION_3 {
            let err = GatewayError::UnsupportedProtocol {
                major: (protocol >> 16) as u16,
                minor: (protocol & 0xffff) as u16,
            };
            return self.terminate(&err).await;
        }
        let Some(user) = params.get("user").filter(|u| !u.is_empty()).cloned() else {
            let err = GatewayError::Authentication {
                code: "28000",
                message: "no PostgreSQL user name specified in startup packet".into(),
            };
            return self.terminate(&err).await;
        };
        self.database = params
            .get("database")
            .filter(|d| !d.is_empty())
            .cloned()
            .unwrap_or_else(|| user.clone());
        self.user = user;

        if let Err(err) = self.authenticate().await {
            return self.terminate(&err).await;
        }
        self.send(BackendMessage::AuthenticationOk);

        let server = &self.gateway.config.server;
        self.settings = Settings::initial(
            &server.server_version,
            &server.server_version_num(),
            self.gateway.auth.is_superuser(&self.user),
            &params,
        );
        for (key, value) in self.settings.reported() {
            self.send(BackendMessage::ParameterStatus { key, value });
        }

        let registration = self.gateway.cancel.register();
        Span::current().record("pid", registration.pid);
        self.send(BackendMessage::BackendKeyData {
            pid: registration.pid,
            secret: registration.secret,
        });
        self.registration = Some(registration);
        info!(user = %self.user, database = %self.database, "session started");

        self.ready_for_query();
        self.flush().await?;
        self.run().await
    }

    async fn authenticate(&mut self) -> Result<(), GatewayError> {
        let gateway = self.gateway.clone();
        match gateway.auth.method() {
            AuthMethod::Trust => Ok(()),
            AuthMethod::Password => {
                self.send(BackendMessage::AuthenticationCleartextPassword);
                self.flush().await?;
                let data = self.read_auth_message().await?;
                gateway
                    .auth
                    .verify_password(&self.user, &parse_password(&data))
            }
            AuthMethod::ScramSha256 => {
                let mut exchange = gateway.auth.scram(&self.user)?;
                self.send(BackendMessage::AuthenticationSasl {
                    mechanisms: vec![SCRAM_MECHANISM.to_string()],
                });
                self.flush().await?;
                let data = self.read_auth_message().await?;
                let (mechanism, client_first) = parse_sasl_initial_response(&data)?;
                if mechanism != SCRAM_MECHANISM {
                    return Err(GatewayError::Authentication {
                        code: "28000",
                        message: format!("unsupported SASL mechanism {mechanism}"),
                    });
                }
                let server_first = exchange.server_first(&client_first)?;
                self.send(BackendMessage::AuthenticationSaslContinue { data: server_first });
                self.flush().await?;
                let client_final = self.read_auth_message().await?;
                let server_final = exchange.server_final(&client_final)?;
                self.send(BackendMessage::AuthenticationSaslFinal { data: server_final });
                Ok(())
            }
        }
    }

    async fn read_auth_message(&mut self) -> Result<Vec<u8>, GatewayError> {
        match read_message_limited(&mut self.stream, MAX_AUTH_MESSAGE_LEN).await {
            Ok(FrontendMessage::Password { data }) => Ok(data),
            Ok(FrontendMessage::Terminate) => Err(GatewayError::Protocol(
                "connection closed during authentication".into(),
            )),
            Ok(_) => Err(GatewayError::Protocol(
                "expected password response message".into(),
            )),
            Err(err) => Err(GatewayError::Protocol(err.to_string())),
        }
    }
}
