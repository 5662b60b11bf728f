//! TLS client setup for broker connections
//!
//! Trust anchors come from a PEM bundle on disk; by default the system CA
//! bundle.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// System CA bundle used when no bundle is configured
pub const DEFAULT_CA_BUNDLE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Error type for TLS configuration
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading files
    Io(std::io::Error),
    /// Certificate parsing error
    CertificateError(String),
    /// Server name not usable for verification
    InvalidServerName(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "IO error: {}", e),
            TlsError::CertificateError(msg) => write!(f, "Certificate error: {}", msg),
            TlsError::InvalidServerName(name) => write!(f, "Invalid server name: {}", name),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(e: std::io::Error) -> Self {
        TlsError::Io(e)
    }
}

/// Load CA certificates from a PEM file into a root store
fn load_ca_certs(path: &Path) -> Result<RootCertStore, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_reader_iter(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateError(format!("Failed to parse certificates: {}", e)))?;

    let mut root_store = RootCertStore::empty();
    let (added, _ignored) = root_store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::CertificateError(format!(
            "No usable CA certificates found in {}",
            path.display()
        )));
    }

    Ok(root_store)
}

/// Build a connector that verifies the broker against the given CA bundle
pub fn client_connector(ca_bundle: &Path) -> Result<TlsConnector, TlsError> {
    let root_store = load_ca_certs(ca_bundle)?;
    let client_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(client_config)))
}
