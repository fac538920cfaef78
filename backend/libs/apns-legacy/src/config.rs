use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{ApnsError, ApnsResult};

pub const DEFAULT_APNS_HOST: &str = "gateway.sandbox.push.apple.com";
pub const DEFAULT_APNS_PORT: u16 = 2195;
pub const DEFAULT_FEEDBACK_PORT: u16 = 2196;
pub const DEFAULT_RETRIES: u32 = 3;

const GATEWAY_MARKER: &str = "gateway";
const FEEDBACK_MARKER: &str = "feedback";

/// Derive the feedback service host from a gateway host.
///
/// Every `gateway` segment becomes `feedback`. Hosts without the marker are
/// returned unchanged.
pub fn derive_feedback_host(gateway_host: &str) -> String {
    gateway_host.replace(GATEWAY_MARKER, FEEDBACK_MARKER)
}

/// Remote host/port pair a session connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// APNs Configuration
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    /// Gateway host for sending notifications
    pub host: String,
    /// Gateway port
    pub port: u16,
    /// Feedback service port, independent of `port`
    pub feedback_port: u16,
    /// PEM file holding the client certificate and private key
    pub pem_path: Option<PathBuf>,
    /// Passphrase for an encrypted private key
    pub pem_passphrase: Option<String>,
    /// CA bundle used instead of the system roots
    pub ca_cert_path: Option<PathBuf>,
    /// Keep the gateway session open between sends
    pub persistent: bool,
    /// Total attempts per send, including the first one
    pub retries: u32,
    /// Pause between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Deadline for TCP connect and TLS handshake, each
    pub connect_timeout: Option<Duration>,
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_APNS_HOST.to_string(),
            port: DEFAULT_APNS_PORT,
            feedback_port: DEFAULT_FEEDBACK_PORT,
            pem_path: None,
            pem_passphrase: None,
            ca_cert_path: None,
            persistent: false,
            retries: DEFAULT_RETRIES,
            retry_backoff: Duration::ZERO,
            connect_timeout: None,
        }
    }
}

impl ApnsConfig {
    /// Create new APNs configuration
    pub fn new(host: impl Into<String>, pem_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            pem_path: Some(pem_path.into()),
            ..Default::default()
        }
    }

    /// Set certificate passphrase
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.pem_passphrase = Some(passphrase.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_feedback_port(mut self, port: u16) -> Self {
        self.feedback_port = port;
        self
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Host of the feedback service paired with this gateway
    pub fn feedback_host(&self) -> String {
        derive_feedback_host(&self.host)
    }

    pub fn gateway_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn feedback_endpoint(&self) -> Endpoint {
        Endpoint::new(self.feedback_host(), self.feedback_port)
    }

    /// Load configuration from environment variables
    ///
    /// **Environment Variables**:
    /// - `APNS_HOST`: Gateway host (default: `gateway.sandbox.push.apple.com`)
    /// - `APNS_PORT`: Gateway port (default: 2195)
    /// - `APNS_FEEDBACK_PORT`: Feedback port (default: 2196)
    /// - `APNS_PEM_PATH`: Certificate + key PEM file (checked on first connection)
    /// - `APNS_PEM_PASSPHRASE`: Private key passphrase (optional)
    /// - `APNS_CA_CERT_PATH`: CA bundle replacing the system roots (optional)
    /// - `APNS_PERSISTENT`: Keep the gateway session open (default: false)
    /// - `APNS_RETRIES`: Attempts per send (default: 3)
    /// - `APNS_RETRY_BACKOFF_MS`: Pause between attempts (default: 0)
    /// - `APNS_CONNECT_TIMEOUT_SECS`: Connect/handshake deadline (optional)
    pub fn from_env() -> ApnsResult<Self> {
        let defaults = Self::default();

        let config = Self {
            host: std::env::var("APNS_HOST").unwrap_or(defaults.host),
            port: parse_env("APNS_PORT")?.unwrap_or(defaults.port),
            feedback_port: parse_env("APNS_FEEDBACK_PORT")?.unwrap_or(defaults.feedback_port),
            pem_path: std::env::var("APNS_PEM_PATH").ok().map(PathBuf::from),
            pem_passphrase: std::env::var("APNS_PEM_PASSPHRASE").ok(),
            ca_cert_path: std::env::var("APNS_CA_CERT_PATH").ok().map(PathBuf::from),
            persistent: parse_env("APNS_PERSISTENT")?.unwrap_or(defaults.persistent),
            retries: parse_env("APNS_RETRIES")?.unwrap_or(defaults.retries),
            retry_backoff: parse_env::<u64>("APNS_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            connect_timeout: parse_env::<u64>("APNS_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs),
        };

        info!(
            host = %config.host,
            port = config.port,
            feedback_host = %config.feedback_host(),
            persistent = config.persistent,
            retries = config.retries,
            "APNs configuration loaded"
        );

        Ok(config)
    }
}

fn parse_env<T>(name: &str) -> ApnsResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ApnsError::config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
