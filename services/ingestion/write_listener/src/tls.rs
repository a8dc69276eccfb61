//! TLS server configuration from PEM files

use crate::config::WriteListenerConfig;
use crate::error::{ListenerError, Result};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Build an acceptor when TLS is configured; `None` serves plain TCP
pub fn acceptor(config: &WriteListenerConfig) -> Result<Option<TlsAcceptor>> {
    let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) else {
        return Ok(None);
    };

    let server_config = server_config(cert, key, config.tls_allowed_cacerts.as_slice())?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn server_config(
    cert: &Path,
    key: &Path,
    allowed_cas: &[impl AsRef<Path>],
) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let certs = load_certs(cert)?;
    let key = PrivateKeyDer::from_pem_file(key)
        .map_err(|e| tls_error(format!("failed to read private key {:?}: {}", key, e)))?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(e.to_string()))?;

    let builder = if allowed_cas.is_empty() {
        builder.with_no_client_auth()
    } else {
        info!(count = allowed_cas.len(), "Requiring client certificates");
        builder.with_client_cert_verifier(client_verifier(allowed_cas, provider)?)
    };

    let mut server_config = builder
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(format!("invalid certificate or key: {}", e)))?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(server_config)
}

fn client_verifier(
    allowed_cas: &[impl AsRef<Path>],
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let mut roots = RootCertStore::empty();
    for path in allowed_cas {
        for cert in load_certs(path.as_ref())? {
            roots
                .add(cert)
                .map_err(|e| tls_error(format!("invalid CA certificate {:?}: {}", path.as_ref(), e)))?;
        }
    }

    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| tls_error(format!("failed to build client verifier: {}", e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| tls_error(format!("failed to read certificates {:?}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(tls_error(format!("no certificates found in {:?}", path)));
    }
    Ok(certs)
}

fn tls_error(message: String) -> ListenerError {
    ListenerError::Tls { message }
}
