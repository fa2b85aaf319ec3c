//! TLS transport for securefetch
//!
//! Thin setup around `rustls`/`tokio-rustls`: PEM loading, acceptor and
//! connector construction, and a bounded connect helper. Everything above
//! this module only needs `AsyncRead + AsyncWrite`.

use crate::error::{Error, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};

/// Load every certificate from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("cannot open certificate {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| Error::Config(format!("invalid certificate {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("no certificates in {}", path.display())));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Load the first PKCS#8, RSA or EC private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("cannot open private key {}: {}", path.display(), e)))?;
    let items = rustls_pemfile::read_all(&mut BufReader::new(file))
        .map_err(|e| Error::Config(format!("invalid private key {}: {}", path.display(), e)))?;

    items
        .into_iter()
        .find_map(|item| match item {
            rustls_pemfile::Item::PKCS8Key(der)
            | rustls_pemfile::Item::RSAKey(der)
            | rustls_pemfile::Item::ECKey(der) => Some(PrivateKey(der)),
            _ => None,
        })
        .ok_or_else(|| Error::Config(format!("no private key in {}", path.display())))
}

/// Build a TLS acceptor from a certificate chain and private key
pub fn server_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(load_certs(cert_path)?, load_private_key(key_path)?)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a TLS connector.
///
/// With `ca_cert` the server must present a chain rooted there. Without it
/// the server certificate is not verified.
pub fn client_connector(ca_cert: Option<&Path>) -> Result<TlsConnector> {
    let builder = ClientConfig::builder().with_safe_defaults();

    let config = match ca_cert {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(&cert).map_err(|e| {
                    Error::Config(format!("unusable CA certificate {}: {:?}", path.display(), e))
                })?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        None => {
            tracing::warn!("no CA certificate configured, server certificate will not be verified");
            builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth()
        }
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Open a TCP connection and run the TLS client handshake within `limit`
pub async fn connect(
    connector: &TlsConnector,
    host: &str,
    port: u16,
    server_name: Option<&str>,
    limit: Duration,
) -> Result<client::TlsStream<TcpStream>> {
    let name = ServerName::try_from(server_name.unwrap_or(host))
        .map_err(|e| Error::Config(format!("invalid server name {:?}: {}", host, e)))?;

    let tcp = tokio::time::timeout(limit, TcpStream::connect((host, port))).await??;
    tcp.set_nodelay(true)?;
    tracing::debug!(%host, port, "TCP connection established");

    let stream = tokio::time::timeout(limit, connector.connect(name, tcp))
        .await?
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(stream)
}

/// Run the TLS server handshake on an accepted TCP stream
pub async fn accept(acceptor: &TlsAcceptor, tcp: TcpStream) -> Result<server::TlsStream<TcpStream>> {
    tcp.set_nodelay(true)?;
    acceptor
        .accept(tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_certs(&dir.path().join("cert.pem"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_pem_without_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a pem file").unwrap();
        assert!(matches!(load_certs(file.path()), Err(Error::Config(_))));
        assert!(matches!(load_private_key(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_unverified_connector_builds() {
        assert!(client_connector(None).is_ok());
    }
}
