use crate::config::TlsConfig;
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// `None` when TLS is disabled; SSLRequest is then answered with `N`.
pub fn build_acceptor(config: &TlsConfig) -> anyhow::Result<Option<TlsAcceptor>> {
    if !config.enabled {
        return Ok(None);
    }
    let cert_path = config
        .cert_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("missing tls cert_path"))?;
    let key_path = config
        .key_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("missing tls key_path"))?;
    let cert_file = &mut BufReader::new(File::open(cert_path)?);
    let key_file = &mut BufReader::new(File::open(key_path)?);
    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    if cert_chain.is_empty() {
        return Err(anyhow::anyhow!("no certificates found in {cert_path}"));
    }
    let key = private_key(key_file)?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}
