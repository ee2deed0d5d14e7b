//! Unified error handling for the connection-lifecycle kernel.
//!
//! Every fallible operation in this crate returns [`KernelError`]. The
//! variants split along the propagation policy the kernel enforces:
//!
//! **Retried locally, never surfaced on their own**:
//! - `Transport`: the establisher retries these under backoff. They only
//!   escape wrapped in context (e.g. inside a TLS setup failure).
//!
//! **Fatal for the process**:
//! - `RetriesExhausted`: the retry budget is spent. There is no broker to
//!   talk to; the device cannot do its job.
//! - `Protocol`: the broker rejected or timed out the handshake during a
//!   connect cycle. There is no fallback.
//! - `SubscriptionLoss`: only raised when `abort_on_subscription_loss` is
//!   set; records the operator's decision that running without the full
//!   subscription set is worse than restarting.
//!
//! **Recoverable by the caller**:
//! - `QueueFull`: command backpressure, back off and resubmit.
//! - `Registry`: table misuse at registration time.
//! - `Config` / `ConfigFile` / `Io` / `Setup`: startup problems, fix and
//!   restart.
//!
//! The kernel never terminates the process itself. The top-level entry
//! point is expected to check [`KernelError::is_fatal`] and turn a fatal
//! result into a controlled shutdown or restart; a device in that state
//! prefers a loud, fast failure over undefined partial operation.

use thiserror::Error;

use crate::backoff::BackoffError;
use crate::engine::{ProtocolError, QueueFull};
use crate::registry::RegistryError;
use crate::transport::TransportError;

/// The unified error type for kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Secured transport failed to open or operate.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection retry budget was spent without reaching the broker.
    #[error("retry policy exhausted: {0}")]
    RetriesExhausted(#[from] BackoffError),

    /// The broker rejected or timed out the protocol handshake.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The broker refused this many subscription filters and the
    /// configuration demands an abort rather than degraded operation.
    #[error("broker refused {0} subscription filter(s)")]
    SubscriptionLoss(u64),

    /// The protocol engine's command queue is full.
    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    /// Subscription registry misuse.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] validator::ValidationErrors),

    /// Configuration file could not be parsed.
    #[error("configuration file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// File I/O failure (configuration, certificate material).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Component construction failed (TLS material, endpoint name).
    #[error("setup error: {0}")]
    Setup(String),
}

impl KernelError {
    /// Whether the kernel considers this unrecoverable for the current
    /// process.
    ///
    /// Fatal errors out of [`crate::supervisor::Supervisor::run`] mean the
    /// device cannot proceed without a broker connection; the embedding
    /// application should terminate or restart rather than limp on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::RetriesExhausted(_)
                | KernelError::Protocol(_)
                | KernelError::SubscriptionLoss(_)
        )
    }
}
