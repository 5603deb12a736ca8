//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ProducesTickets;
use rustls::ServerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Certificate chain and private key served to accepted clients.
#[derive(Debug)]
pub struct ServerIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for ServerIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

/// Load a PEM certificate chain and private key.
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Result<ServerIdentity, TlsError> {
    let cert_chain = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| io_error(cert_path, source))?;
    if cert_chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.display().to_string()));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|source| io_error(key_path, source))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.display().to_string()))?;

    Ok(ServerIdentity { cert_chain, key })
}

/// TLS 1.2 server configuration issuing tickets through `ticketer`.
pub fn build_server_config(
    identity: ServerIdentity,
    ticketer: Arc<dyn ProducesTickets>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain, identity.key)?;
    config.ticketer = ticketer;
    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> TlsError {
    TlsError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::{KeyRing, KeyRingTicketer};
    use std::fs;
    use std::time::Duration;

    fn write_pem(name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let cert = rcgen::generate_simple_self_signed(vec!["gate.test".to_string()]).unwrap();
        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!("{name}-cert.pem"));
        let key_path = dir.join(format!("{name}-key.pem"));
        fs::write(&cert_path, cert.cert.pem()).unwrap();
        fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn loads_pem_identity() {
        let (cert_path, key_path) = write_pem("ticket-gate-tls-load");
        let identity = load_identity(&cert_path, &key_path).unwrap();
        assert_eq!(identity.cert_chain.len(), 1);

        let ticketer = Arc::new(KeyRingTicketer::new(
            Arc::new(KeyRing::generated()),
            Duration::from_secs(3600),
        ));
        let config = build_server_config(identity, ticketer).unwrap();
        assert!(config.ticketer.enabled());

        fs::remove_file(&cert_path).unwrap_or_default();
        fs::remove_file(&key_path).unwrap_or_default();
    }

    #[test]
    fn missing_files_and_empty_pem() {
        let missing = Path::new("/nonexistent/ticket-gate/cert.pem");
        assert!(matches!(
            load_identity(missing, missing),
            Err(TlsError::Io { .. })
        ));

        let empty = std::env::temp_dir().join("ticket-gate-tls-empty.pem");
        fs::write(&empty, "").unwrap();
        assert!(matches!(
            load_identity(&empty, &empty),
            Err(TlsError::NoCertificates(_))
        ));
        fs::remove_file(&empty).unwrap_or_default();
    }
}
