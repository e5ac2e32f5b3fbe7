//! TLS configuration and certificate loading.
//!
//! Outbound: the mutual-TLS client configuration used to reach the
//! upstream service. Inbound: optional server certificate for the proxy
//! listener.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

/// Errors raised while building TLS configuration. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("no certificates found in {path:?}")]
    NoCertificates { path: PathBuf },

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Build the client configuration for mutual TLS to the upstream.
///
/// The client presents the certificate chain in `cert_path` with the key
/// in `key_path`, trusts only the CAs in `ca_path`, and negotiates TLS 1.2
/// or newer.
pub fn build_client_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: &Path,
) -> Result<ClientConfig, TlsError> {
    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certificates(ca_path)? {
        roots.add(ca)?;
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
    .with_root_certificates(roots)
    .with_client_auth_cert(certs, key)?;

    tracing::info!(
        cert = ?cert_path,
        ca = ?ca_path,
        "Upstream mTLS client configuration loaded"
    );
    Ok(config)
}

/// Load the listener's TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    for path in [cert_path, key_path] {
        if !path.exists() {
            return Err(TlsError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
    }

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| TlsError::Parse {
            path: cert_path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read_pem(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read_pem(path)?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|e| TlsError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.pem");
        let err = build_client_config(&missing, &missing, &missing).unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }

    #[test]
    fn file_without_certificates_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        fs::write(&path, "just some text\n").unwrap();
        let err = load_certificates(&path).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates { .. }));
    }

    #[test]
    fn corrupt_pem_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pem");
        fs::write(
            &path,
            "-----BEGIN CERTIFICATE-----\n!!!not base64!!!\n-----END CERTIFICATE-----\n",
        )
        .unwrap();
        assert!(load_certificates(&path).is_err());
        assert!(load_private_key(&path).is_err());
    }

    #[tokio::test]
    async fn listener_tls_requires_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("server.crt");
        assert!(load_tls_config(&missing, &missing).await.is_err());
    }
}
