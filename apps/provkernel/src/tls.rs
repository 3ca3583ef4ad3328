//! # TLS Material
//!
//! Every listener requires a client certificate chaining to the configured
//! client CA. The one-shot clients present their own certificate and
//! verify the kernel against the server CA.
//!
//! The `ring` provider is passed explicitly; no process-wide default is
//! installed.

use crate::config::TlsPaths;
use crate::error::ServerError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn open(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::Tls(format!("{}: {}", path.display(), e)))
}

/// Every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("{}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

/// The first private key in a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| ServerError::Tls(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| ServerError::Tls(format!("{}: no private key found", path.display())))
}

fn root_store(path: &Path) -> Result<RootCertStore, ServerError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| ServerError::Tls(format!("{}: {}", path.display(), e)))?;
    }
    Ok(roots)
}

/// Acceptor shared by all four listeners.
pub fn server_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = WebPkiClientVerifier::builder_with_provider(
        Arc::new(root_store(&paths.client_ca)?),
        Arc::clone(&provider),
    )
    .build()
    .map_err(|e| ServerError::Tls(e.to_string()))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(&paths.server_cert)?, load_key(&paths.server_key)?)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Connector used by the `control` and `query` subcommands.
pub fn client_connector(paths: &TlsPaths) -> Result<TlsConnector, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store(&paths.server_ca)?)
        .with_client_auth_cert(load_certs(&paths.client_cert)?, load_key(&paths.client_key)?)?;

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Server name to verify for `host` (DNS name or IP literal).
pub fn server_name(host: &str) -> Result<ServerName<'static>, ServerError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| ServerError::Tls(format!("invalid server name '{}': {}", host, e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files_are_reported() {
        let err = load_certs(Path::new("/nonexistent/ca.crt")).expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/ca.crt"));
        assert!(load_key(Path::new("/nonexistent/server.key")).is_err());
    }

    #[test]
    fn test_pem_without_certificates() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "not a certificate").expect("write");
        let err = load_certs(file.path()).expect_err("empty");
        assert!(err.to_string().contains("no certificates"));
        assert!(load_key(file.path()).is_err());
    }

    #[test]
    fn test_server_names() {
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("kernel.example.org").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
