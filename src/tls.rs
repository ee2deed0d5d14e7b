//! Production secured transport: TLS over TCP via rustls.
//!
//! [`TlsConnector`] implements [`TransportConnector`] for a fixed broker
//! endpoint. Certificate material is loaded and the client configuration
//! built once at construction; each `open` call then performs a TCP
//! connect followed by the TLS handshake. The handshake internals belong
//! to rustls; this module only loads PEM material and opens and closes
//! sessions.
//!
//! Brokers listening on port 443 usually demand an ALPN protocol name to
//! distinguish MQTT from HTTPS traffic; set
//! [`crate::config::TlsConfig::alpn_protocol`] for those.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::KernelError;
use crate::transport::{TransportConnector, TransportError};

/// TLS session opener for a single broker endpoint.
pub struct TlsConnector {
    endpoint: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: tokio_rustls::TlsConnector,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Builds a connector from validated configuration.
    ///
    /// Loads the CA trust anchor and, when configured, the mutual-TLS
    /// client identity. Fails fast on unusable certificate material so the
    /// establisher never retries a hopeless setup.
    pub fn from_config(config: &Config) -> Result<Self, KernelError> {
        config.tls.validate_material()?;

        let ca_path = config
            .tls
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| KernelError::Setup("CA certificate path is required".into()))?;
        let roots = load_root_store(ca_path)?;

        let builder = ClientConfig::builder().with_root_certificates(roots);
        let mut tls_config = match (&config.tls.client_cert_path, &config.tls.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let (chain, key) = load_client_identity(cert_path, key_path)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|err| KernelError::Setup(format!("client identity rejected: {err}")))?
            }
            _ => builder.with_no_client_auth(),
        };

        if let Some(alpn) = &config.tls.alpn_protocol {
            tls_config.alpn_protocols = vec![alpn.as_bytes().to_vec()];
        }

        let server_name = ServerName::try_from(config.endpoint.clone()).map_err(|_| {
            KernelError::Setup(format!(
                "endpoint is not a valid server name: {}",
                config.endpoint
            ))
        })?;

        info!(
            endpoint = %config.endpoint,
            port = config.port,
            client_auth = config.tls.has_client_auth(),
            "tls connector ready"
        );

        Ok(Self {
            endpoint: config.endpoint.clone(),
            port: config.port,
            server_name,
            connector: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
        })
    }
}

impl TransportConnector for TlsConnector {
    type Link = tokio_rustls::client::TlsStream<TcpStream>;

    async fn open(&mut self) -> Result<Self::Link, TransportError> {
        debug!(endpoint = %self.endpoint, port = self.port, "opening tls session");
        let tcp = TcpStream::connect((self.endpoint.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;
        let stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await?;
        Ok(stream)
    }

    async fn close(&mut self, link: Self::Link) {
        let mut link = link;
        if let Err(err) = link.shutdown().await {
            debug!(error = %err, "tls teardown error ignored");
        }
    }
}

fn load_root_store(path: &str) -> Result<RootCertStore, KernelError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut roots = RootCertStore::empty();
    let mut loaded = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        roots
            .add(cert?)
            .map_err(|err| KernelError::Setup(format!("CA certificate rejected: {err}")))?;
        loaded += 1;
    }
    if loaded == 0 {
        return Err(KernelError::Setup(format!(
            "no CA certificates found in {path}"
        )));
    }
    Ok(roots)
}

fn load_client_identity(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), KernelError> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let chain = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(KernelError::Setup(format!(
            "no client certificates found in {cert_path}"
        )));
    }

    let mut reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| KernelError::Setup(format!("no private key found in {key_path}")))?;

    Ok((chain, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("mqtt-kernel-{}-{name}", std::process::id()));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_trust_anchor_fails_construction() {
        let config = Config::default();
        let err = TlsConnector::from_config(&config).expect_err("no CA configured");
        assert!(err.to_string().contains("CA certificate"));
    }

    #[test]
    fn garbage_pem_fails_construction() {
        let ca = temp_file("garbage-ca.pem", "this is not a certificate");
        let config = Config {
            tls: crate::config::TlsConfig::ca_only(ca.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let err = TlsConnector::from_config(&config).expect_err("unusable CA material");
        assert!(err.to_string().contains("no CA certificates"));
        let _ = std::fs::remove_file(ca);
    }

    #[test]
    fn nonexistent_files_fail_before_parsing() {
        let config = Config {
            tls: crate::config::TlsConfig::ca_only("/does/not/exist.pem"),
            ..Default::default()
        };
        assert!(TlsConnector::from_config(&config).is_err());
    }
}
