use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use fedbroker_transport::TlsContext;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::error::DaemonError;

/// Builds the client TLS context shared by both broker connections.
///
/// Returns `None` when no TLS material is configured at all. Without a CA
/// file the bundled web PKI roots are trusted; the client certificate and
/// key must be given together.
pub fn load_tls_context(
    ca_path: Option<&Path>,
    cert_path: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<Option<TlsContext>, DaemonError> {
    if ca_path.is_none() && cert_path.is_none() && key_path.is_none() {
        return Ok(None);
    }

    let mut roots = RootCertStore::empty();
    match ca_path {
        Some(path) => {
            let certs = read_certs(path)?;
            let (added, _ignored) = roots.add_parsable_certificates(certs);
            if added == 0 {
                return Err(DaemonError::Tls(format!(
                    "no usable CA certificates in {}",
                    path.display()
                )));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| DaemonError::Tls(err.to_string()))?
        .with_root_certificates(roots);

    let config = match (cert_path, key_path) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
            .map_err(|err| DaemonError::Tls(err.to_string()))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(DaemonError::Tls(
                "tls_cert_path and tls_key_path must be set together".to_string(),
            ))
        }
    };
    Ok(Some(TlsContext::new(Arc::new(config))))
}

fn open(path: &Path) -> Result<BufReader<File>, DaemonError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| DaemonError::TlsFile {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, DaemonError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| DaemonError::TlsFile {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(DaemonError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, DaemonError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| DaemonError::TlsFile {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| DaemonError::Tls(format!("no private key in {}", path.display())))
}
