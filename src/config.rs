//! Configuration for the connection-lifecycle kernel.
//!
//! All settings deserialize with serde, so TOML files, environment-driven
//! loaders, and programmatic construction all work. Constraints are
//! enforced with the `validator` crate: an invalid configuration fails at
//! load time, not at connect time.
//!
//! # Examples
//!
//! ```ignore
//! // From a TOML file
//! let config = Config::from_file("device.toml")?;
//!
//! // Or programmatically
//! let config = Config {
//!     endpoint: "broker.example.com".into(),
//!     port: 8883,
//!     tls: TlsConfig::mutual("/certs/ca.pem", "/certs/device.crt", "/certs/device.key"),
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```
//!
//! Example `device.toml`:
//! ```toml
//! endpoint = "broker.example.com"
//! port = 8883
//! client_id = "pump-station-7"
//! keep_alive_secs = 60
//!
//! [backoff]
//! base_ms = 500
//! max_delay_ms = 5000
//! max_attempts = 5
//!
//! [tls]
//! ca_cert_path = "/certs/ca.pem"
//! client_cert_path = "/certs/device.crt"
//! client_key_path = "/certs/device.key"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::KernelError;

/// Main kernel configuration.
///
/// Validated once at startup; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address.
    ///
    /// DNS resolution happens at connect time, not validation time.
    #[validate(length(min = 1, max = 255, message = "Endpoint must be between 1 and 255 characters"))]
    pub endpoint: String,

    /// Broker port. 8883 is the conventional TLS port; 443 typically
    /// requires an ALPN protocol name (see [`TlsConfig::alpn_protocol`]).
    #[validate(range(min = 1, message = "Port must be nonzero"))]
    pub port: u16,

    /// Unique client identity presented in the handshake.
    ///
    /// Brokers key session state on this, so two live devices must never
    /// share one. Defaults to a random UUID, which is safe but defeats
    /// session resumption across restarts; production devices should set
    /// something stable such as a serial number.
    #[validate(length(min = 1, max = 128, message = "Client id must be between 1 and 128 characters"))]
    pub client_id: String,

    /// Keep-alive interval advertised to the broker, in seconds.
    #[validate(range(min = 5, max = 3600, message = "Keep alive must be between 5 and 3600 seconds"))]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker's handshake acknowledgement, in
    /// milliseconds. Exceeding it fails the connect cycle.
    #[validate(range(min = 100, max = 60_000, message = "Handshake ack timeout must be between 100 and 60000 ms"))]
    pub connack_timeout_ms: u64,

    /// Optional username credential. Some broker operators require a
    /// metrics string here; that policy belongs to deployment, not to the
    /// kernel.
    pub username: Option<String>,

    /// Optional password credential, paired with `username`.
    pub password: Option<String>,

    /// Capacity of the subscription registry. Fixed for the life of the
    /// supervisor.
    #[validate(range(min = 1, max = 256, message = "Subscription capacity must be between 1 and 256"))]
    pub max_subscriptions: usize,

    /// Treat broker-refused resubscriptions as fatal.
    ///
    /// Refused filters are always pruned from the registry first. With
    /// this flag set the supervisor then stops with
    /// [`KernelError::SubscriptionLoss`] instead of carrying on with the
    /// reduced set.
    pub abort_on_subscription_loss: bool,

    /// Connection retry backoff parameters.
    #[validate(nested)]
    pub backoff: BackoffConfig,

    /// TLS material for the secured transport.
    #[validate(nested)]
    pub tls: TlsConfig,
}

impl Default for Config {
    /// Defaults suitable for development against a local broker.
    ///
    /// The generated UUID client id is fine for testing but should be
    /// replaced with a stable identity in production.
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 8883,
            client_id: Uuid::new_v4().to_string(),
            keep_alive_secs: 60,
            connack_timeout_ms: 2000,
            username: None,
            password: None,
            max_subscriptions: 10,
            abort_on_subscription_loss: false,
            backoff: BackoffConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let text = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Bounded exponential backoff parameters for connection retries.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay in milliseconds; the jitter ceiling of the first retry.
    #[validate(range(min = 1, max = 60_000, message = "Backoff base must be between 1 and 60000 ms"))]
    pub base_ms: u64,

    /// Maximum delay in milliseconds; no computed delay exceeds this.
    #[validate(range(min = 1, max = 300_000, message = "Backoff cap must be between 1 and 300000 ms"))]
    pub max_delay_ms: u64,

    /// Total connection attempts per connect cycle before giving up.
    #[validate(range(min = 1, max = 100, message = "Max attempts must be between 1 and 100"))]
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_delay_ms: 5000,
            max_attempts: 5,
        }
    }
}

/// TLS material for the secured broker connection.
///
/// Paths are checked for existence by [`TlsConfig::validate_material`]
/// when the transport connector is built, not when the struct is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the PEM-encoded CA certificate used to verify the broker.
    /// Required for any connection.
    pub ca_cert_path: Option<String>,

    /// Path to the PEM-encoded client certificate for mutual TLS. If
    /// either this or `client_key_path` is set, both must be.
    pub client_cert_path: Option<String>,

    /// Path to the PEM-encoded, unencrypted client private key. Keep it
    /// out of version control and world-readable filesystems.
    pub client_key_path: Option<String>,

    /// ALPN protocol name to offer, typically required when the broker
    /// listens on port 443.
    pub alpn_protocol: Option<String>,
}

impl TlsConfig {
    /// CA-only verification, no client authentication.
    pub fn ca_only(ca_cert_path: impl Into<String>) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    /// Full mutual TLS.
    pub fn mutual(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
            alpn_protocol: None,
        }
    }

    /// Whether both halves of the client identity are configured.
    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    /// Checks that the referenced certificate material is usable.
    ///
    /// Catches the half-configured client identity case early: one of
    /// cert/key present without the other is a deployment mistake, not a
    /// request for server-only authentication.
    pub fn validate_material(&self) -> Result<(), KernelError> {
        let ca = self
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| KernelError::Setup("CA certificate path is required".into()))?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(KernelError::Setup(
                    "client certificate and key must be provided together or not at all".into(),
                ))
            }
            _ => {}
        }

        ensure_file(ca)?;
        if let (Some(cert), Some(key)) = (&self.client_cert_path, &self.client_key_path) {
            ensure_file(cert)?;
            ensure_file(key)?;
        }
        Ok(())
    }
}

fn ensure_file(path: &str) -> Result<(), KernelError> {
    let p = Path::new(path);
    if !p.is_file() {
        return Err(KernelError::Setup(format!(
            "certificate file does not exist or is not a file: {path}"
        )));
    }
    Ok(())
}
