use crate::admin::{self, AdminState};
use crate::auth::Authenticator;
use crate::cancel::CancelRegistry;
use crate::config::Config;
use crate::session;
use crate::tls::build_acceptor;
use pgbridge_bridge::{Bridge, Connector};
use pgbridge_core::{OidRegistry, SchemaMapping, SchemaMappingHandle, Severity};
use pgbridge_embedded::EmbeddedConnector;
use pgbridge_protocol::backend::write_message;
use pgbridge_protocol::{BackendMessage, ErrorFields};
use pgbridge_sql::{CatalogEmulator, Translator, TranslatorConfig};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Process-wide state shared by every session.
pub struct Gateway {
    pub config: Config,
    pub bridge: Arc<Bridge>,
    pub translator: Translator,
    pub catalog: CatalogEmulator,
    pub mapping: SchemaMappingHandle,
    pub cancel: Arc<CancelRegistry>,
    pub auth: Authenticator,
    pub tls: Option<TlsAcceptor>,
}

impl Gateway {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> anyhow::Result<Self> {
        let mapping =
            SchemaMapping::resolve(config.translation.backend_schema.as_deref());
        info!(
            backend_schema = %mapping.backend_schema,
            source = ?mapping.source,
            "schema mapping resolved"
        );
        let bridge = Bridge::new(
            connector,
            config.backend.pool(),
            config.backend.retry(),
            config.backend.bridge(),
        );
        let translator = Translator::new(TranslatorConfig {
            identifier_case: config.translation.identifier_case,
        });
        let catalog = CatalogEmulator::new(
            Arc::new(OidRegistry::new()),
            config.server.server_version.clone(),
        );
        let auth = Authenticator::new(&config.security.auth)?;
        let tls = build_acceptor(&config.security.tls)?;
        Ok(Self {
            config,
            bridge: Arc::new(bridge),
            translator,
            catalog,
            mapping: SchemaMappingHandle::new(mapping),
            cancel: Arc::new(CancelRegistry::new()),
            auth,
            tls,
        })
    }
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let gateway = Arc::new(Gateway::new(config, Arc::new(EmbeddedConnector::new()))?);
    let listen_addr = gateway.config.server.listen_addr.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, tls = gateway.tls.is_some(), "pgbridge listening");

    if gateway.config.admin.enabled {
        let state = AdminState {
            bridge: gateway.bridge.clone(),
            mapping: gateway.mapping.clone(),
            cancel: gateway.cancel.clone(),
        };
        let addr = gateway.config.admin.listen_addr.clone();
        tokio::spawn(async move {
            if let Err(err) = admin::serve(&addr, state).await {
                error!("admin server error: {err}");
            }
        });
    }

    let slots = Arc::new(Semaphore::new(gateway.config.server.max_connections));
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("accept error: {err}");
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        };
        metrics::counter!("pgbridge_connections_total").increment(1);
        if let Err(err) = socket.set_nodelay(true) {
            debug!("set_nodelay failed: {err}");
        }
        let gateway = gateway.clone();
        let permit = slots.clone().try_acquire_owned();
        let span = info_span!(
            "conn",
            id = %Uuid::new_v4(),
            peer = %peer,
            pid = tracing::field::Empty
        );
        tokio::spawn(
            async move {
                match permit {
                    Ok(_permit) => {
                        if let Err(err) = session::serve(socket, gateway).await {
                            debug!("connection closed: {err}");
                        }
                    }
                    Err(_) => reject(socket).await,
                }
            }
            .instrument(span),
        );
    }
    Ok(())
}

async fn reject(mut socket: TcpStream) {
    warn!("connection limit reached");
    let fields = ErrorFields::new(Severity::Fatal, "53300", "sorry, too many clients already");
    if let Err(err) = write_message(&mut socket, BackendMessage::ErrorResponse(fields)).await {
        debug!("failed to reject connection: {err}");
    }
}
