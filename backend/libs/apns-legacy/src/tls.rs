//! Mutually-authenticated TLS transport for the gateway and feedback hosts
//!
//! The client certificate and its private key live in a single PEM file, as
//! exported from the Apple developer portal. The key may be a plain PKCS#8 /
//! PKCS#1 / SEC1 block or a passphrase-protected PKCS#8 block
//! (`ENCRYPTED PRIVATE KEY`).
//!
//! The PEM file is read on every connection attempt, so a rotated certificate
//! is picked up by the next session without rebuilding the client.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as RustlsConnector;
use tracing::{debug, info, warn};

use crate::config::{ApnsConfig, Endpoint};
use crate::connection::Connector;
use crate::error::{ApnsError, ApnsResult};

const ENCRYPTED_PKCS8_TAG: &str = "ENCRYPTED PRIVATE KEY";

/// Client certificate chain and private key loaded from a PEM file
pub struct ClientIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl ClientIdentity {
    /// Load the identity from the configured PEM file
    ///
    /// Fails with a configuration error when the path is unset, the file does
    /// not exist, or the file holds no usable certificate/key pair.
    pub fn from_pem_file(path: Option<&Path>, passphrase: Option<&str>) -> ApnsResult<Self> {
        let path = path.ok_or_else(|| ApnsError::config("PEM certificate path is not set"))?;

        if !path.exists() {
            return Err(ApnsError::config(format!(
                "PEM certificate file {} does not exist",
                path.display()
            )));
        }

        let pem_bytes = std::fs::read(path).map_err(|e| {
            ApnsError::config(format!("failed to read PEM file {}: {e}", path.display()))
        })?;

        Self::from_pem(&pem_bytes, passphrase)
    }

    pub fn from_pem(pem_bytes: &[u8], passphrase: Option<&str>) -> ApnsResult<Self> {
        let cert_chain = load_certificates(pem_bytes)?;
        if cert_chain.is_empty() {
            return Err(ApnsError::config("PEM file contains no certificate"));
        }

        let private_key = load_private_key(pem_bytes, passphrase)?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }
}

fn load_certificates(pem_bytes: &[u8]) -> ApnsResult<Vec<CertificateDer<'static>>> {
    let mut reader = pem_bytes;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApnsError::config(format!("failed to parse certificate PEM: {e}")))
}

fn load_private_key(
    pem_bytes: &[u8],
    passphrase: Option<&str>,
) -> ApnsResult<PrivateKeyDer<'static>> {
    // rustls-pemfile skips encrypted blocks, so look for them first
    if let Ok(blocks) = pem::parse_many(pem_bytes) {
        for block in &blocks {
            if block.tag() == ENCRYPTED_PKCS8_TAG {
                let passphrase = passphrase.ok_or_else(|| {
                    ApnsError::config("private key is encrypted but no passphrase is configured")
                })?;
                return decrypt_pkcs8(block.contents(), passphrase);
            }

            let legacy_encrypted = block.tag().ends_with("PRIVATE KEY")
                && block
                    .headers()
                    .get("Proc-Type")
                    .is_some_and(|value| value.contains("ENCRYPTED"));
            if legacy_encrypted {
                return Err(ApnsError::config(
                    "legacy OpenSSL-encrypted private keys are not supported, \
                     convert the key with `openssl pkcs8 -topk8`",
                ));
            }
        }
    }

    let mut reader = pem_bytes;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ApnsError::config(format!("failed to parse private key PEM: {e}")))?
        .ok_or_else(|| ApnsError::config("PEM file contains no private key"))
}

fn decrypt_pkcs8(der: &[u8], passphrase: &str) -> ApnsResult<PrivateKeyDer<'static>> {
    let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| ApnsError::config(format!("malformed encrypted private key: {e}")))?;

    let document = encrypted
        .decrypt(passphrase)
        .map_err(|e| ApnsError::config(format!("failed to decrypt private key: {e}")))?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        document.as_bytes().to_vec(),
    )))
}

fn load_root_store(ca_cert_path: Option<&Path>) -> ApnsResult<RootCertStore> {
    let mut roots = RootCertStore::empty();

    match ca_cert_path {
        Some(path) => {
            let pem_bytes = std::fs::read(path).map_err(|e| {
                ApnsError::config(format!("failed to read CA bundle {}: {e}", path.display()))
            })?;
            for cert in load_certificates(&pem_bytes)? {
                roots
                    .add(cert)
                    .map_err(|e| ApnsError::config(format!("invalid CA certificate: {e}")))?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs().map_err(|e| {
                ApnsError::config(format!("failed to load system root certificates: {e}"))
            })?;
            let (added, ignored) = roots.add_parsable_certificates(native);
            if ignored > 0 {
                warn!(added, ignored, "Some system root certificates could not be parsed");
            }
        }
    }

    if roots.is_empty() {
        return Err(ApnsError::config("no trusted root certificates available"));
    }

    Ok(roots)
}

/// Opens TCP connections and upgrades them to mutually-authenticated TLS
#[derive(Debug, Clone)]
pub struct TlsConnector {
    pem_path: Option<PathBuf>,
    pem_passphrase: Option<String>,
    ca_cert_path: Option<PathBuf>,
    connect_timeout: Option<Duration>,
}

impl TlsConnector {
    pub fn from_config(cfg: &ApnsConfig) -> Self {
        Self {
            pem_path: cfg.pem_path.clone(),
            pem_passphrase: cfg.pem_passphrase.clone(),
            ca_cert_path: cfg.ca_cert_path.clone(),
            connect_timeout: cfg.connect_timeout,
        }
    }

    /// Build the rustls client config with the client certificate attached
    pub fn client_config(&self) -> ApnsResult<Arc<ClientConfig>> {
        let identity = ClientIdentity::from_pem_file(
            self.pem_path.as_deref(),
            self.pem_passphrase.as_deref(),
        )?;
        let roots = load_root_store(self.ca_cert_path.as_deref())?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ApnsError::config(format!("unsupported TLS protocol versions: {e}")))?
            .with_root_certificates(roots)
            .with_client_auth_cert(identity.cert_chain, identity.private_key)
            .map_err(|e| ApnsError::config(format!("invalid client certificate or key: {e}")))?;

        Ok(Arc::new(config))
    }

    async fn within_deadline<F, T>(&self, stage: &str, endpoint: &Endpoint, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{stage} to {endpoint} timed out after {limit:?}"),
                )
            })?,
            None => fut.await,
        }
    }
}

#[async_trait]
impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self, endpoint: &Endpoint) -> ApnsResult<Self::Stream> {
        // Certificate problems surface before any socket is opened
        let tls_config = self.client_config()?;
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            ApnsError::config(format!("invalid APNs host {}: {e}", endpoint.host))
        })?;

        debug!(%endpoint, "Opening TCP connection");
        let tcp = self
            .within_deadline(
                "TCP connect",
                endpoint,
                TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
            )
            .await?;

        let stream = self
            .within_deadline(
                "TLS handshake",
                endpoint,
                RustlsConnector::from(tls_config).connect(server_name, tcp),
            )
            .await?;

        info!(host = %endpoint.host, port = endpoint.port, "TLS session established");

        Ok(stream)
    }
}
