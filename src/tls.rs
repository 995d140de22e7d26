//! Optional HTTPS for the panel listener

use crate::config::ServerConfig;
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Build the TLS acceptor described by `server`, or None when TLS is off
pub fn acceptor_for(server: &ServerConfig) -> anyhow::Result<Option<TlsAcceptor>> {
    if !server.tls_enabled() {
        return Ok(None);
    }

    let (certs, key) = match (&server.tls_cert, &server.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            info!(cert = %cert_path, key = %key_path, "TLS enabled with provided certificates");
            (certs, key)
        }
        _ => {
            warn!("TLS enabled with auto-generated self-signed certificate");
            self_signed_cert()?
        }
    };

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow::anyhow!("TLS configuration error: {}", e))?;

    Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
}

fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate file {}: {}", path, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificates from {}: {}", path, e))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }
    Ok(certs)
}

fn load_key(path: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).map_err(|e| anyhow::anyhow!("Failed to open key file {}: {}", path, e))?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| anyhow::anyhow!("Failed to parse key from {}: {}", path, e))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", path))
}

fn self_signed_cert() -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(names)
        .map_err(|e| anyhow::anyhow!("Failed to generate self-signed certificate: {}", e))?;

    let key = PrivateKeyDer::try_from(key_pair.serialize_der())
        .map_err(|e| anyhow::anyhow!("Failed to serialize private key: {}", e))?;
    Ok((vec![cert.der().clone()], key))
}
